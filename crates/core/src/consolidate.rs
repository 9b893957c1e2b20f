use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cancel::{is_cancelled, CancellationToken};
use crate::config::EngineConfig;
use crate::detector::resolve_conflict;
use crate::error::{EngineError, Outcome, Result};
use crate::inventory::Inventory;
use crate::model::{Conflict, MediaType, PlanAction, PlanDraft, PlanScope};
use crate::space::SpaceProbe;

pub const CONSOLIDATE_REASON: &str = "Consolidate into target location";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetReason {
    MostFiles,
    MostFreeSpace,
    FirstLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetChoice {
    pub path: PathBuf,
    pub reason: TargetReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveOperation {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub size_bytes: u64,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictPlan {
    pub conflict_id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub title_normalized: String,
    pub year: Option<i32>,
    pub source_paths: Vec<PathBuf>,
    pub target: Option<TargetChoice>,
    pub operations: Vec<MoveOperation>,
    pub total_files: u64,
    pub total_bytes: u64,
    pub can_proceed: bool,
    pub reasons: Vec<String>,
}

impl ConflictPlan {
    fn blocked(&mut self, reason: String) {
        self.can_proceed = false;
        self.reasons.push(reason);
    }
}

pub fn select_target(
    inventory: &Inventory,
    conflict: &Conflict,
    probe: &dyn SpaceProbe,
) -> Result<Option<TargetChoice>> {
    if conflict.locations.is_empty() {
        return Ok(None);
    }

    let mut counts = Vec::with_capacity(conflict.locations.len());
    for location in &conflict.locations {
        let count = inventory.count_files_under(
            conflict.media_type,
            &conflict.title_normalized,
            conflict.year,
            location,
        )?;
        counts.push((location, count));
    }

    let most = counts.iter().map(|(_, count)| *count).max().unwrap_or(0);
    let leaders = counts
        .iter()
        .filter(|(_, count)| *count == most)
        .map(|(location, _)| *location)
        .collect::<Vec<_>>();
    if most > 0 && leaders.len() == 1 {
        return Ok(Some(TargetChoice {
            path: leaders[0].clone(),
            reason: TargetReason::MostFiles,
        }));
    }

    let mut roomiest: Option<(&PathBuf, u64)> = None;
    for location in leaders.iter().copied() {
        let Some(free) = probe.free_space(location) else {
            continue;
        };
        match roomiest {
            Some((_, best)) if best >= free => {}
            _ => roomiest = Some((location, free)),
        }
    }
    if let Some((location, _)) = roomiest {
        return Ok(Some(TargetChoice {
            path: location.clone(),
            reason: TargetReason::MostFreeSpace,
        }));
    }

    Ok(leaders.first().map(|location| TargetChoice {
        path: (*location).clone(),
        reason: TargetReason::FirstLocation,
    }))
}

pub fn generate_conflict_plan(
    inventory: &Inventory,
    conflict: &Conflict,
    config: &EngineConfig,
    probe: &dyn SpaceProbe,
) -> Result<ConflictPlan> {
    let mut plan = ConflictPlan {
        conflict_id: conflict.id,
        media_type: conflict.media_type,
        title: conflict.title.clone(),
        title_normalized: conflict.title_normalized.clone(),
        year: conflict.year,
        source_paths: conflict.locations.clone(),
        target: None,
        operations: Vec::new(),
        total_files: 0,
        total_bytes: 0,
        can_proceed: true,
        reasons: Vec::new(),
    };

    let Some(target) = select_target(inventory, conflict, probe)? else {
        plan.blocked("Failed to choose target path: conflict has no locations".to_string());
        return Ok(plan);
    };

    let excludes = ExcludeMatcher::new(&config.exclude_patterns);
    let file_type = match conflict.media_type {
        MediaType::Movie => MediaType::Movie,
        MediaType::Series | MediaType::Episode => MediaType::Episode,
    };

    for source in &conflict.locations {
        if *source == target.path {
            continue;
        }
        match files_to_move(source, &target.path, file_type, config, &excludes) {
            Ok(mut operations) => plan.operations.append(&mut operations),
            Err(err) => plan.blocked(format!(
                "Failed to list files at {}: {err}",
                source.display()
            )),
        }
    }

    plan.total_files = plan.operations.len() as u64;
    plan.total_bytes = plan.operations.iter().map(|op| op.size_bytes).sum();
    plan.target = Some(target);
    Ok(plan)
}

pub fn generate_conflict_plans(
    inventory: &Inventory,
    config: &EngineConfig,
    probe: &dyn SpaceProbe,
    cancel: Option<&CancellationToken>,
) -> Outcome<Vec<ConflictPlan>> {
    let mut plans = Vec::new();
    let conflicts = match inventory.unresolved_conflicts() {
        Ok(conflicts) => conflicts,
        Err(err) => return Outcome::partial(plans, err),
    };

    for conflict in conflicts.iter().filter(|conflict| conflict.is_open()) {
        if is_cancelled(cancel) {
            return Outcome::partial(plans, EngineError::Cancelled);
        }
        match generate_conflict_plan(inventory, conflict, config, probe) {
            Ok(plan) => plans.push(plan),
            Err(err) => return Outcome::partial(plans, err),
        }
    }
    Outcome::complete(plans)
}

pub fn queue_conflict_plan(inventory: &Inventory, plan: &ConflictPlan) -> Result<usize> {
    let Some(target) = plan.target.as_ref().filter(|_| plan.can_proceed) else {
        warn!(
            conflict_id = plan.conflict_id,
            reasons = ?plan.reasons,
            "conflict plan cannot proceed; nothing queued"
        );
        return Ok(0);
    };

    let scope = PlanScope::Conflict(plan.conflict_id);
    inventory.clear_pending(scope)?;

    if plan.operations.is_empty() {
        resolve_conflict(inventory, plan.conflict_id, &target.path)?;
        info!(
            conflict_id = plan.conflict_id,
            path = %target.path.display(),
            "nothing left to move; conflict resolved"
        );
        return Ok(0);
    }

    let mut drafts = Vec::with_capacity(plan.operations.len());
    for op in &plan.operations {
        let source_file_id = inventory.get_file(&op.source)?.map(|file| file.id);
        drafts.push(PlanDraft {
            action: PlanAction::Move,
            scope,
            media_type: Some(op.media_type),
            source_file_id,
            source_path: op.source.clone(),
            target_path: Some(op.destination.clone()),
            target_root: Some(target.path.clone()),
            size_bytes: op.size_bytes,
            reason: CONSOLIDATE_REASON.to_string(),
            reason_details: Some(format!(
                "{} ({}): target {} chosen by {:?}",
                plan.title,
                plan.media_type,
                target.path.display(),
                target.reason
            )),
        });
    }
    let queued = inventory.insert_plans(drafts)?.len();

    info!(
        conflict_id = plan.conflict_id,
        queued,
        bytes = plan.total_bytes,
        "queued consolidation moves"
    );
    Ok(queued)
}

fn files_to_move(
    source: &Path,
    target: &Path,
    media_type: MediaType,
    config: &EngineConfig,
    excludes: &ExcludeMatcher,
) -> std::result::Result<Vec<MoveOperation>, walkdir::Error> {
    let mut operations = Vec::new();
    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !excludes.is_excluded(entry.path()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !config.is_media_path(path) {
            continue;
        }
        let size_bytes = entry.metadata()?.len();
        if size_bytes <= config.min_consolidation_size_bytes {
            continue;
        }
        let Ok(relative) = path.strip_prefix(source) else {
            continue;
        };
        let destination = target.join(relative);
        if destination.symlink_metadata().is_ok() {
            continue;
        }
        operations.push(MoveOperation {
            source: path.to_path_buf(),
            destination,
            size_bytes,
            media_type,
        });
    }
    Ok(operations)
}

struct ExcludeMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
}

impl ExcludeMatcher {
    fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();
        let mut globs = 0;
        for pattern in patterns.iter().map(|pattern| pattern.trim()) {
            if pattern.is_empty() {
                continue;
            }
            if is_plain_substring_pattern(pattern) {
                substrings.push(pattern.to_lowercase());
                continue;
            }
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    globs += 1;
                }
                Err(err) => {
                    warn!(pattern, error = %err, "invalid exclude glob; using substring match");
                    substrings.push(pattern.to_lowercase());
                }
            }
        }

        let globset = if globs == 0 {
            None
        } else {
            match builder.build() {
                Ok(set) => Some(set),
                Err(err) => {
                    warn!(error = %err, "failed to compile exclude globs; glob excludes disabled");
                    None
                }
            }
        };
        Self {
            globset,
            substrings,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self
            .globset
            .as_ref()
            .is_some_and(|globset| globset.is_match(path))
        {
            return true;
        }
        if self.substrings.is_empty() {
            return false;
        }
        let lowered = path.to_string_lossy().to_lowercase();
        self.substrings
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}
