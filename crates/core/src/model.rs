use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::{quality_score, QualityProfile};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Movie,
    Series,
    Episode,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "series",
            Self::Episode => "episode",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MediaFile {
    pub id: i64,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub media_type: MediaType,
    pub movie_id: Option<i64>,
    pub series_id: Option<i64>,
    pub episode_id: Option<i64>,
    pub normalized_title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub quality: QualityProfile,
    pub quality_score: i64,
    pub is_compliant: bool,
    pub compliance_issues: Vec<String>,
    pub source: String,
    pub source_priority: i32,
    pub library_root: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64, media_type: MediaType) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            media_type,
            is_compliant: true,
            ..Self::default()
        }
    }

    pub fn rescore(&mut self) {
        self.quality_score = quality_score(
            &self.quality,
            self.size_bytes,
            self.media_type == MediaType::Episode,
        );
    }

    pub fn parent_dir(&self) -> Option<&Path> {
        self.path.parent()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DownstreamSystem {
    Sonarr,
    Radarr,
    Jellyfin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SyncState {
    pub dirty: bool,
    pub synced_at: Option<DateTime<Utc>>,
}

pub type SyncFlags = BTreeMap<DownstreamSystem, SyncState>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Series {
    pub id: i64,
    pub title: String,
    pub title_normalized: String,
    pub year: Option<i32>,
    pub canonical_path: PathBuf,
    pub library_root: Option<PathBuf>,
    pub source: String,
    pub source_priority: i32,
    pub external_id: Option<i64>,
    pub sync: SyncFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub title_normalized: String,
    pub year: Option<i32>,
    pub canonical_path: PathBuf,
    pub library_root: Option<PathBuf>,
    pub source: String,
    pub source_priority: i32,
    pub external_id: Option<i64>,
    pub sync: SyncFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Episode {
    pub id: i64,
    pub series_id: i64,
    pub season: u32,
    pub episode: u32,
    pub title: Option<String>,
    pub best_file_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecordRef {
    Series(i64),
    Movie(i64),
}

impl RecordRef {
    pub fn default_system(self) -> DownstreamSystem {
        match self {
            Self::Series(_) => DownstreamSystem::Sonarr,
            Self::Movie(_) => DownstreamSystem::Radarr,
        }
    }

    pub fn media_type(self) -> MediaType {
        match self {
            Self::Series(_) => MediaType::Series,
            Self::Movie(_) => MediaType::Movie,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Conflict {
    pub id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub title_normalized: String,
    pub year: Option<i32>,
    pub locations: Vec<PathBuf>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl Conflict {
    pub fn is_open(&self) -> bool {
        !self.resolved && self.resolved_at.is_none() && self.locations.len() >= 2
    }

    pub fn add_location(&mut self, path: &Path) -> bool {
        if self.locations.iter().any(|existing| existing == path) {
            return false;
        }
        self.locations.push(path.to_path_buf());
        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            Self::Pending | Self::Executing => false,
            Self::Completed | Self::Failed | Self::Skipped => true,
        }
    }

    /// Allowed moves: pending -> executing -> terminal, or pending -> terminal directly.
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Executing) => true,
            (Self::Pending | Self::Executing, target) => target.is_terminal(),
            (Self::Completed | Self::Failed | Self::Skipped, _) => false,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Delete,
    Move,
    Rename,
}

impl PlanAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rename => "rename",
        }
    }

    pub fn execution_rank(self) -> u8 {
        match self {
            Self::Rename => 0,
            Self::Move => 1,
            Self::Delete => 2,
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanScope {
    #[default]
    Duplicates,
    Conflict(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Completed,
    Failed(String),
    Skipped(String),
}

impl PlanOutcome {
    pub fn status(&self) -> PlanStatus {
        match self {
            Self::Completed => PlanStatus::Completed,
            Self::Failed(_) => PlanStatus::Failed,
            Self::Skipped(_) => PlanStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidationPlan {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub action: PlanAction,
    #[serde(default)]
    pub scope: PlanScope,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub source_file_id: Option<i64>,
    pub source_path: PathBuf,
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    #[serde(default)]
    pub target_root: Option<PathBuf>,
    #[serde(default)]
    pub size_bytes: u64,
    pub reason: String,
    #[serde(default)]
    pub reason_details: Option<String>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    pub action: PlanAction,
    pub scope: PlanScope,
    pub media_type: Option<MediaType>,
    pub source_file_id: Option<i64>,
    pub source_path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub target_root: Option<PathBuf>,
    pub size_bytes: u64,
    pub reason: String,
    pub reason_details: Option<String>,
}

impl PlanDraft {
    pub fn into_plan(self, id: i64, created_at: DateTime<Utc>) -> ConsolidationPlan {
        ConsolidationPlan {
            id,
            created_at,
            status: PlanStatus::Pending,
            action: self.action,
            scope: self.scope,
            media_type: self.media_type,
            source_file_id: self.source_file_id,
            source_path: self.source_path,
            target_path: self.target_path,
            target_root: self.target_root,
            size_bytes: self.size_bytes,
            reason: self.reason,
            reason_details: self.reason_details,
            executed_at: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub media_type: MediaType,
    pub normalized_title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub best: MediaFile,
    pub inferior: Vec<MediaFile>,
    pub space_reclaimable: u64,
}

impl DuplicateGroup {
    pub fn file_count(&self) -> usize {
        self.inferior.len() + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ConsolidationStats {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub duplicate_groups: u64,
    pub duplicate_files: u64,
    pub space_reclaimable: u64,
    pub non_compliant_files: u64,
    pub non_compliant_folders: u64,
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{Conflict, PlanAction, PlanStatus};

    #[test]
    fn terminal_statuses_never_reenter() {
        assert!(PlanStatus::Pending.can_transition_to(PlanStatus::Executing));
        assert!(PlanStatus::Executing.can_transition_to(PlanStatus::Failed));
        assert!(PlanStatus::Pending.can_transition_to(PlanStatus::Completed));
        assert!(!PlanStatus::Executing.can_transition_to(PlanStatus::Pending));
        for terminal in [
            PlanStatus::Completed,
            PlanStatus::Failed,
            PlanStatus::Skipped,
        ] {
            assert!(!terminal.can_transition_to(PlanStatus::Pending));
            assert!(!terminal.can_transition_to(PlanStatus::Completed));
        }
    }

    #[test]
    fn conflict_locations_are_a_set() {
        let mut conflict = Conflict {
            locations: vec!["/a".into()],
            ..Conflict::default()
        };
        assert!(!conflict.is_open());
        assert!(conflict.add_location(Path::new("/b")));
        assert!(!conflict.add_location(Path::new("/a")));
        assert!(conflict.is_open());
        assert_eq!(conflict.locations.len(), 2);
    }

    #[test]
    fn actions_order_rename_before_delete() {
        let mut actions = vec![PlanAction::Delete, PlanAction::Rename, PlanAction::Move];
        actions.sort_by_key(|action| action.execution_rank());
        assert_eq!(
            actions,
            vec![PlanAction::Rename, PlanAction::Move, PlanAction::Delete]
        );
    }
}
