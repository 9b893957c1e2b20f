//! Lock-guarded media inventory.
//!
//! Reads take the shared lock, every mutation takes the exclusive lock. A
//! file-backed inventory rewrites its JSON snapshot before a mutation returns,
//! so a write is durable once the call succeeds. Callers never hold the lock
//! across disk transfers; they read, release, do the I/O, then write.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::identity::{normalize_title, MediaIdentity};
use crate::model::{
    Conflict, ConsolidationPlan, ConsolidationStats, DuplicateGroup, Episode, MediaFile,
    MediaType, Movie, PlanDraft, PlanOutcome, PlanScope, PlanStatus, Series,
};
use crate::resolver::group_duplicates;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
struct Sequences {
    file: i64,
    series: i64,
    movie: i64,
    episode: i64,
    conflict: i64,
    plan: i64,
}

fn bump(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub(crate) struct InventoryState {
    sequences: Sequences,
    pub(crate) files: BTreeMap<PathBuf, MediaFile>,
    pub(crate) series: BTreeMap<i64, Series>,
    pub(crate) movies: BTreeMap<i64, Movie>,
    pub(crate) episodes: BTreeMap<i64, Episode>,
    pub(crate) conflicts: BTreeMap<i64, Conflict>,
    pub(crate) plans: BTreeMap<i64, ConsolidationPlan>,
}

impl InventoryState {
    pub(crate) fn upsert_file(&mut self, mut file: MediaFile) -> i64 {
        let now = Utc::now();
        match self.files.get(&file.path) {
            Some(existing) => {
                file.id = existing.id;
                file.created_at = existing.created_at;
            }
            None => {
                file.id = bump(&mut self.sequences.file);
                file.created_at = now;
            }
        }
        file.updated_at = now;
        let id = file.id;
        self.files.insert(file.path.clone(), file);
        id
    }

    fn duplicate_movies(&self) -> Vec<DuplicateGroup> {
        group_duplicates(
            self.files
                .values()
                .filter(|file| file.media_type == MediaType::Movie),
        )
    }

    fn duplicate_episodes(&self) -> Vec<DuplicateGroup> {
        group_duplicates(self.files.values().filter(|file| {
            file.media_type == MediaType::Episode && file.season.is_some() && file.episode.is_some()
        }))
    }

    pub(crate) fn insert_series(&mut self, mut series: Series) -> i64 {
        let now = Utc::now();
        if series.title_normalized.is_empty() {
            series.title_normalized = normalize_title(&series.title);
        }
        series.id = bump(&mut self.sequences.series);
        series.created_at = now;
        series.updated_at = now;
        let id = series.id;
        self.series.insert(id, series);
        id
    }

    pub(crate) fn insert_movie(&mut self, mut movie: Movie) -> i64 {
        let now = Utc::now();
        if movie.title_normalized.is_empty() {
            movie.title_normalized = normalize_title(&movie.title);
        }
        movie.id = bump(&mut self.sequences.movie);
        movie.created_at = now;
        movie.updated_at = now;
        let id = movie.id;
        self.movies.insert(id, movie);
        id
    }

    pub(crate) fn find_series_id(&self, title_normalized: &str, year: Option<i32>) -> Option<i64> {
        self.series
            .values()
            .find(|series| series.title_normalized == title_normalized && series.year == year)
            .map(|series| series.id)
    }

    pub(crate) fn find_movie_id(&self, title_normalized: &str, year: Option<i32>) -> Option<i64> {
        self.movies
            .values()
            .find(|movie| movie.title_normalized == title_normalized && movie.year == year)
            .map(|movie| movie.id)
    }

    pub(crate) fn insert_conflict(&mut self, mut conflict: Conflict) -> i64 {
        conflict.id = bump(&mut self.sequences.conflict);
        conflict.created_at = Utc::now();
        let id = conflict.id;
        self.conflicts.insert(id, conflict);
        id
    }

    pub(crate) fn unresolved_conflict_mut(
        &mut self,
        media_type: MediaType,
        title_normalized: &str,
        year: Option<i32>,
    ) -> Option<&mut Conflict> {
        self.conflicts.values_mut().find(|conflict| {
            !conflict.resolved
                && conflict.media_type == media_type
                && conflict.title_normalized == title_normalized
                && conflict.year == year
        })
    }

    pub(crate) fn latest_conflict(
        &self,
        media_type: MediaType,
        title_normalized: &str,
        year: Option<i32>,
    ) -> Option<&Conflict> {
        self.conflicts.values().rev().find(|conflict| {
            conflict.media_type == media_type
                && conflict.title_normalized == title_normalized
                && conflict.year == year
        })
    }

    pub(crate) fn insert_plan(&mut self, draft: PlanDraft) -> i64 {
        let id = bump(&mut self.sequences.plan);
        self.plans.insert(id, draft.into_plan(id, Utc::now()));
        id
    }

    pub(crate) fn clear_pending(&mut self, scope: PlanScope) -> usize {
        let before = self.plans.len();
        self.plans
            .retain(|_, plan| !(plan.scope == scope && plan.status == PlanStatus::Pending));
        before - self.plans.len()
    }
}

pub struct Inventory {
    state: RwLock<InventoryState>,
    snapshot_path: Option<PathBuf>,
}

impl Inventory {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(InventoryState::default()),
            snapshot_path: None,
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|err| EngineError::io(&path, err))?;
            serde_json::from_str(&data)?
        } else {
            InventoryState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, InventoryState>> {
        self.state
            .read()
            .map_err(|_| EngineError::Store("inventory lock poisoned".to_string()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, InventoryState>> {
        self.state
            .write()
            .map_err(|_| EngineError::Store("inventory lock poisoned".to_string()))
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&InventoryState) -> T) -> Result<T> {
        let guard = self.read_guard()?;
        Ok(f(&guard))
    }

    /// Applies `f` under the exclusive lock. A failed closure or snapshot write
    /// leaves the state exactly as it was.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut InventoryState) -> Result<T>) -> Result<T> {
        let mut guard = self.write_guard()?;
        let mut scratch = guard.clone();
        let value = f(&mut scratch)?;
        if let Some(path) = self.snapshot_path.as_deref() {
            persist(path, &scratch)?;
        }
        *guard = scratch;
        Ok(value)
    }

    pub fn upsert_file(&self, file: MediaFile) -> Result<i64> {
        self.write(|state| Ok(state.upsert_file(file)))
    }

    pub fn get_file(&self, path: &Path) -> Result<Option<MediaFile>> {
        self.read(|state| state.files.get(path).cloned())
    }

    pub fn get_file_by_id(&self, id: i64) -> Result<Option<MediaFile>> {
        self.read(|state| state.files.values().find(|file| file.id == id).cloned())
    }

    pub fn delete_file(&self, path: &Path) -> Result<bool> {
        self.write(|state| Ok(state.files.remove(path).is_some()))
    }

    pub fn all_files(&self) -> Result<Vec<MediaFile>> {
        self.read(|state| state.files.values().cloned().collect())
    }

    pub fn files_for_identity(&self, identity: &MediaIdentity) -> Result<Vec<MediaFile>> {
        self.read(|state| {
            state
                .files
                .values()
                .filter(|file| MediaIdentity::for_file(file) == *identity)
                .cloned()
                .collect()
        })
    }

    pub fn count_files_under(
        &self,
        media_type: MediaType,
        title_normalized: &str,
        year: Option<i32>,
        location: &Path,
    ) -> Result<usize> {
        let file_type = match media_type {
            MediaType::Series | MediaType::Episode => MediaType::Episode,
            MediaType::Movie => MediaType::Movie,
        };
        self.read(|state| {
            state
                .files
                .values()
                .filter(|file| {
                    file.media_type == file_type
                        && file.normalized_title == title_normalized
                        && file.year == year
                        && file.path.starts_with(location)
                })
                .count()
        })
    }

    pub fn find_non_compliant_files(&self) -> Result<Vec<MediaFile>> {
        self.read(|state| {
            state
                .files
                .values()
                .filter(|file| !file.is_compliant)
                .cloned()
                .collect()
        })
    }

    pub fn find_duplicate_movies(&self) -> Result<Vec<DuplicateGroup>> {
        self.read(InventoryState::duplicate_movies)
    }

    pub fn find_duplicate_episodes(&self) -> Result<Vec<DuplicateGroup>> {
        self.read(InventoryState::duplicate_episodes)
    }

    pub fn get_consolidation_stats(&self) -> Result<ConsolidationStats> {
        self.read(|state| {
            let non_compliant = state
                .files
                .values()
                .filter(|file| !file.is_compliant)
                .collect::<Vec<_>>();
            let folders = non_compliant
                .iter()
                .filter_map(|file| file.parent_dir())
                .collect::<BTreeSet<_>>();
            let mut stats = ConsolidationStats {
                total_files: state.files.len() as u64,
                total_size_bytes: state.files.values().map(|file| file.size_bytes).sum(),
                non_compliant_files: non_compliant.len() as u64,
                non_compliant_folders: folders.len() as u64,
                ..ConsolidationStats::default()
            };

            let movies = state.duplicate_movies();
            let episodes = state.duplicate_episodes();
            for group in movies.iter().chain(episodes.iter()) {
                stats.duplicate_groups += 1;
                stats.duplicate_files += group.inferior.len() as u64;
                stats.space_reclaimable += group.space_reclaimable;
            }
            stats
        })
    }

    pub fn insert_series(&self, series: Series) -> Result<i64> {
        self.write(|state| Ok(state.insert_series(series)))
    }

    pub fn insert_movie(&self, movie: Movie) -> Result<i64> {
        self.write(|state| Ok(state.insert_movie(movie)))
    }

    pub fn get_series(&self, id: i64) -> Result<Option<Series>> {
        self.read(|state| state.series.get(&id).cloned())
    }

    pub fn get_movie(&self, id: i64) -> Result<Option<Movie>> {
        self.read(|state| state.movies.get(&id).cloned())
    }

    pub fn find_series(&self, title_normalized: &str, year: Option<i32>) -> Result<Option<Series>> {
        self.read(|state| {
            state
                .find_series_id(title_normalized, year)
                .and_then(|id| state.series.get(&id).cloned())
        })
    }

    pub fn find_movie(&self, title_normalized: &str, year: Option<i32>) -> Result<Option<Movie>> {
        self.read(|state| {
            state
                .find_movie_id(title_normalized, year)
                .and_then(|id| state.movies.get(&id).cloned())
        })
    }

    pub fn all_series(&self) -> Result<Vec<Series>> {
        self.read(|state| state.series.values().cloned().collect())
    }

    pub fn all_movies(&self) -> Result<Vec<Movie>> {
        self.read(|state| state.movies.values().cloned().collect())
    }

    pub fn upsert_episode(&self, mut episode: Episode) -> Result<i64> {
        self.write(|state| {
            let existing = state.episodes.values().find(|row| {
                row.series_id == episode.series_id
                    && row.season == episode.season
                    && row.episode == episode.episode
            });
            episode.id = match existing {
                Some(row) => row.id,
                None => bump(&mut state.sequences.episode),
            };
            let id = episode.id;
            state.episodes.insert(id, episode);
            Ok(id)
        })
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        self.read(|state| state.episodes.get(&id).cloned())
    }

    pub fn get_conflict(&self, id: i64) -> Result<Option<Conflict>> {
        self.read(|state| state.conflicts.get(&id).cloned())
    }

    pub fn all_conflicts(&self) -> Result<Vec<Conflict>> {
        self.read(|state| state.conflicts.values().cloned().collect())
    }

    pub fn unresolved_conflicts(&self) -> Result<Vec<Conflict>> {
        self.read(|state| {
            state
                .conflicts
                .values()
                .filter(|conflict| !conflict.resolved)
                .cloned()
                .collect()
        })
    }

    pub fn insert_plan(&self, draft: PlanDraft) -> Result<i64> {
        self.write(|state| Ok(state.insert_plan(draft)))
    }

    pub fn insert_plans(&self, drafts: Vec<PlanDraft>) -> Result<Vec<i64>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        self.write(|state| {
            Ok(drafts
                .into_iter()
                .map(|draft| state.insert_plan(draft))
                .collect())
        })
    }

    pub fn get_plan(&self, id: i64) -> Result<Option<ConsolidationPlan>> {
        self.read(|state| state.plans.get(&id).cloned())
    }

    pub fn all_plans(&self) -> Result<Vec<ConsolidationPlan>> {
        self.read(|state| state.plans.values().cloned().collect())
    }

    pub fn pending_plans(&self) -> Result<Vec<ConsolidationPlan>> {
        self.read(|state| {
            let mut plans = state
                .plans
                .values()
                .filter(|plan| plan.status == PlanStatus::Pending)
                .cloned()
                .collect::<Vec<_>>();
            plans.sort_by(|a, b| {
                a.action
                    .execution_rank()
                    .cmp(&b.action.execution_rank())
                    .then_with(|| a.id.cmp(&b.id))
            });
            plans
        })
    }

    pub fn plans_in_scope(&self, scope: PlanScope) -> Result<Vec<ConsolidationPlan>> {
        self.read(|state| {
            state
                .plans
                .values()
                .filter(|plan| plan.scope == scope)
                .cloned()
                .collect()
        })
    }

    pub fn clear_pending(&self, scope: PlanScope) -> Result<usize> {
        let removed = self.write(|state| Ok(state.clear_pending(scope)))?;
        debug!(?scope, removed, "cleared pending plans");
        Ok(removed)
    }

    pub fn transition_plan(&self, id: i64, outcome: PlanOutcome) -> Result<ConsolidationPlan> {
        self.write(|state| {
            let plan = state
                .plans
                .get_mut(&id)
                .ok_or(EngineError::PlanNotFound(id))?;
            let next = outcome.status();
            if !plan.status.can_transition_to(next) {
                return Err(EngineError::PlanNotPending {
                    id,
                    status: plan.status,
                });
            }
            plan.status = next;
            plan.executed_at = Some(Utc::now());
            plan.error_message = match outcome {
                PlanOutcome::Completed => None,
                PlanOutcome::Failed(message) | PlanOutcome::Skipped(message) => Some(message),
            };
            Ok(plan.clone())
        })
    }
}

fn persist(path: &Path, state: &InventoryState) -> Result<()> {
    let payload = serde_json::to_vec_pretty(state)?;
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| EngineError::io(parent, err))?;
    }
    fs::write(&tmp, payload).map_err(|err| EngineError::io(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| EngineError::io(path, err))?;
    Ok(())
}
