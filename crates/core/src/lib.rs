pub mod cancel;
pub mod catalog;
pub mod config;
pub mod consolidate;
pub mod detector;
pub mod dirty;
pub mod error;
pub mod executor;
pub mod identity;
pub mod inventory;
pub mod model;
pub mod notify;
pub mod planner;
pub mod quality;
pub mod resolver;
pub mod space;
pub mod transfer;

pub use cancel::CancellationToken;
pub use catalog::{decide, Existing, UpsertDecision};
pub use config::{EngineConfig, TransferConfig, MIN_CONSOLIDATION_SIZE_BYTES};
pub use consolidate::{
    generate_conflict_plan, generate_conflict_plans, queue_conflict_plan, select_target,
    ConflictPlan, MoveOperation, TargetChoice, TargetReason,
};
pub use detector::{
    apply_movie, apply_series, detect_conflicts, record_conflict, resolve_conflict, UpsertOutcome,
};
pub use dirty::{get_dirty, is_dirty, mark_synced, set_dirty, DirtyRecord};
pub use error::{EngineError, Outcome, Result};
pub use executor::{DryRunAction, ExecutionResult, Executor, PlanError};
pub use identity::{extract_year, normalize_title, strip_year, MediaIdentity};
pub use inventory::Inventory;
pub use model::{
    Conflict, ConsolidationPlan, ConsolidationStats, DownstreamSystem, DuplicateGroup, Episode,
    MediaFile, MediaType, Movie, PlanAction, PlanDraft, PlanOutcome, PlanScope, PlanStatus,
    RecordRef, Series, SyncFlags, SyncState,
};
pub use notify::{sync_dirty, CatalogClient, CatalogEntry, Notifier, NotifyOutcome, SyncReport};
pub use planner::{generate_plans, summarize_pending, ManualReviewItem, PlanSummary};
pub use quality::{quality_score, AudioFormat, QualityProfile, Resolution, SourceType, VideoCodec};
pub use resolver::{group_duplicates, resolve, Selection};
pub use space::{SpaceProbe, StaticSpaceProbe, SystemSpaceProbe};
pub use transfer::{
    hash_file, FallbackTransferer, KernelCopyTransferer, NativeTransferer, TransferOptions,
    TransferResult, Transferer,
};
