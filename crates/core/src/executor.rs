use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::{is_cancelled, CancellationToken};
use crate::config::EngineConfig;
use crate::detector::resolve_conflict;
use crate::dirty::flag_dirty;
use crate::error::{EngineError, Outcome, Result};
use crate::inventory::{Inventory, InventoryState};
use crate::model::{
    ConsolidationPlan, MediaType, PlanAction, PlanOutcome, PlanScope, PlanStatus, RecordRef,
};
use crate::notify::Notifier;
use crate::transfer::{TransferOptions, Transferer};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanError {
    pub plan_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DryRunAction {
    pub plan_id: i64,
    pub action: PlanAction,
    pub source: PathBuf,
    pub target: Option<PathBuf>,
    pub size_bytes: u64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub dry_run: bool,
    pub plans_executed: u64,
    pub plans_succeeded: u64,
    pub plans_failed: u64,
    pub plans_skipped: u64,
    pub files_deleted: u64,
    pub files_moved: u64,
    pub files_renamed: u64,
    pub space_reclaimed: u64,
    pub duration: Duration,
    pub errors: Vec<PlanError>,
    pub dry_run_actions: Vec<DryRunAction>,
}

impl ExecutionResult {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            dry_run,
            plans_executed: 0,
            plans_succeeded: 0,
            plans_failed: 0,
            plans_skipped: 0,
            files_deleted: 0,
            files_moved: 0,
            files_renamed: 0,
            space_reclaimed: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
            dry_run_actions: Vec::new(),
        }
    }

    fn record(&mut self, action: PlanAction, applied: &Applied) {
        match applied {
            Applied::Done { reclaimed, .. } => {
                self.plans_succeeded += 1;
                match action {
                    PlanAction::Delete => {
                        self.files_deleted += 1;
                        self.space_reclaimed += reclaimed;
                    }
                    PlanAction::Move => self.files_moved += 1,
                    PlanAction::Rename => self.files_renamed += 1,
                }
            }
            Applied::Skipped(_) => self.plans_skipped += 1,
        }
    }
}

enum Applied {
    Done {
        reclaimed: u64,
        relocated: Option<Relocated>,
    },
    Skipped(String),
}

impl Applied {
    fn done(reclaimed: u64) -> Self {
        Self::Done {
            reclaimed,
            relocated: None,
        }
    }
}

struct Relocated {
    source: PathBuf,
    target: PathBuf,
    media_type: MediaType,
}

pub struct Executor<'a> {
    inventory: &'a Inventory,
    transferer: &'a dyn Transferer,
    options: TransferOptions,
    dry_run: bool,
    notifier: Option<&'a Notifier>,
}

impl<'a> Executor<'a> {
    pub fn new(
        inventory: &'a Inventory,
        transferer: &'a dyn Transferer,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inventory,
            transferer,
            options: TransferOptions::from_config(config),
            dry_run: config.dry_run,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn execute_plans(&self, cancel: Option<&CancellationToken>) -> Outcome<ExecutionResult> {
        let started = Instant::now();
        let mut result = ExecutionResult::new(self.dry_run);

        let plans = match self.inventory.pending_plans() {
            Ok(plans) => plans,
            Err(err) => return Outcome::partial(result, err),
        };
        info!(
            run_id = %result.run_id,
            plans = plans.len(),
            dry_run = self.dry_run,
            "executing consolidation plans"
        );

        let mut scopes = BTreeSet::new();
        let mut relocations = Vec::new();
        let mut halted = None;
        for plan in &plans {
            if is_cancelled(cancel) {
                halted = Some(EngineError::Cancelled);
                break;
            }
            if let PlanScope::Conflict(id) = plan.scope {
                scopes.insert(id);
            }
            match self.run(plan, &mut result) {
                Ok(relocated) => relocations.extend(relocated),
                Err(err) => result.errors.push(PlanError {
                    plan_id: plan.id,
                    message: err.to_string(),
                }),
            }
        }

        if !self.dry_run {
            for conflict_id in scopes {
                if let Err(err) = self.settle_conflict(conflict_id) {
                    warn!(conflict_id, error = %err, "could not settle conflict");
                }
            }
        }
        self.notify_batch(&relocations);

        result.duration = started.elapsed();
        info!(
            run_id = %result.run_id,
            executed = result.plans_executed,
            succeeded = result.plans_succeeded,
            failed = result.plans_failed,
            skipped = result.plans_skipped,
            reclaimed = result.space_reclaimed,
            "plan execution finished"
        );
        match halted {
            Some(err) => Outcome::partial(result, err),
            None => Outcome::complete(result),
        }
    }

    /// Executes one plan and records its terminal status. The stored plan is
    /// authoritative; `plan` only names it. The returned error is the plan's own
    /// failure, already persisted on the plan.
    pub fn execute_plan(&self, plan: &ConsolidationPlan) -> Result<ExecutionResult> {
        self.execute_plan_by_id(plan.id)
    }

    pub fn execute_plan_by_id(&self, id: i64) -> Result<ExecutionResult> {
        let plan = self
            .inventory
            .get_plan(id)?
            .ok_or(EngineError::PlanNotFound(id))?;
        if plan.status != PlanStatus::Pending {
            return Err(EngineError::PlanNotPending {
                id,
                status: plan.status,
            });
        }

        let started = Instant::now();
        let mut result = ExecutionResult::new(self.dry_run);
        let relocated = self.run(&plan, &mut result)?;
        if let (PlanScope::Conflict(conflict_id), false) = (plan.scope, self.dry_run) {
            self.settle_conflict(conflict_id)?;
        }
        if let (Some(moved), Some(notifier)) = (relocated, self.notifier) {
            let notified =
                notifier.notify_file_move(&moved.source, &moved.target, moved.media_type);
            if let Err(err) = notified {
                warn!(target = %moved.target.display(), error = %err, "catalog notification failed");
            }
        }
        result.duration = started.elapsed();
        Ok(result)
    }

    fn run(
        &self,
        plan: &ConsolidationPlan,
        result: &mut ExecutionResult,
    ) -> Result<Option<Relocated>> {
        result.plans_executed += 1;
        if self.dry_run {
            self.rehearse(plan, result)?;
            return Ok(None);
        }

        debug!(
            plan_id = plan.id,
            action = %plan.action,
            source = %plan.source_path.display(),
            "executing plan"
        );
        let applied = match self.conflict_settled(plan) {
            Ok(Some(reason)) => Ok(Applied::Skipped(reason)),
            Ok(None) => match plan.action {
                PlanAction::Delete => self.delete(plan),
                PlanAction::Move | PlanAction::Rename => self.relocate(plan),
            },
            Err(err) => Err(err),
        };

        match applied {
            Ok(applied) => {
                let outcome = match &applied {
                    Applied::Done { .. } => PlanOutcome::Completed,
                    Applied::Skipped(reason) => PlanOutcome::Skipped(reason.clone()),
                };
                self.inventory.transition_plan(plan.id, outcome)?;
                result.record(plan.action, &applied);
                Ok(match applied {
                    Applied::Done { relocated, .. } => relocated,
                    Applied::Skipped(_) => None,
                })
            }
            Err(err) => {
                warn!(plan_id = plan.id, error = %err, "plan failed");
                result.plans_failed += 1;
                let recorded = self
                    .inventory
                    .transition_plan(plan.id, PlanOutcome::Failed(err.to_string()));
                if let Err(record_err) = recorded {
                    warn!(plan_id = plan.id, error = %record_err, "could not record plan failure");
                    return Err(EngineError::Store(format!(
                        "{err}; failure not recorded: {record_err}"
                    )));
                }
                Err(err)
            }
        }
    }

    fn rehearse(&self, plan: &ConsolidationPlan, result: &mut ExecutionResult) -> Result<()> {
        let mut action = DryRunAction {
            plan_id: plan.id,
            action: plan.action,
            source: plan.source_path.clone(),
            target: plan.target_path.clone(),
            size_bytes: plan.size_bytes,
            note: None,
        };

        let checked = match self.conflict_settled(plan)? {
            Some(reason) => Ok(Applied::Skipped(reason)),
            None => match plan.action {
                PlanAction::Delete => match file_size(&plan.source_path)? {
                    Some(size) => Ok(Applied::done(size)),
                    None => {
                        action.note = Some("already absent".to_string());
                        Ok(Applied::done(0))
                    }
                },
                PlanAction::Move | PlanAction::Rename => {
                    check_relocation(plan).map(|_| Applied::done(0))
                }
            },
        };

        match checked {
            Ok(applied) => {
                if let Applied::Skipped(reason) = &applied {
                    action.note = Some(reason.clone());
                }
                info!(
                    plan_id = plan.id,
                    action = %plan.action,
                    source = %plan.source_path.display(),
                    target = ?plan.target_path,
                    "would execute plan"
                );
                result.record(plan.action, &applied);
                result.dry_run_actions.push(action);
                Ok(())
            }
            Err(err) => {
                result.plans_failed += 1;
                action.note = Some(err.to_string());
                result.dry_run_actions.push(action);
                Err(err)
            }
        }
    }

    fn conflict_settled(&self, plan: &ConsolidationPlan) -> Result<Option<String>> {
        let PlanScope::Conflict(id) = plan.scope else {
            return Ok(None);
        };
        let conflict = self.inventory.get_conflict(id)?;
        Ok(match conflict {
            Some(conflict) if conflict.resolved => Some(format!("conflict {id} already resolved")),
            Some(_) => None,
            None => Some(format!("conflict {id} no longer exists")),
        })
    }

    /// An already missing source counts as deleted. A disk removal is never
    /// undone when the inventory update after it fails.
    fn delete(&self, plan: &ConsolidationPlan) -> Result<Applied> {
        let path = &plan.source_path;
        let Some(size) = file_size(path)? else {
            debug!(path = %path.display(), "delete target already absent");
            self.inventory.delete_file(path)?;
            return Ok(Applied::done(0));
        };

        fs::remove_file(path).map_err(|err| EngineError::io(path, err))?;
        info!(path = %path.display(), bytes = size, "deleted file");

        self.inventory.delete_file(path).map_err(|err| {
            EngineError::Store(format!(
                "{} was removed from disk but its inventory record was not: {err}",
                path.display()
            ))
        })?;
        Ok(Applied::done(size))
    }

    fn relocate(&self, plan: &ConsolidationPlan) -> Result<Applied> {
        let target = check_relocation(plan)?;
        let source = &plan.source_path;

        let transfer = self.transferer.transfer(source, target, &self.options)?;
        if !transfer.success {
            return Err(EngineError::Transfer(transfer.error.unwrap_or_else(|| {
                format!("{} reported failure without detail", self.transferer.name())
            })));
        }
        info!(
            source = %source.display(),
            target = %target.display(),
            bytes = transfer.bytes_copied,
            attempts = transfer.attempts,
            "relocated file"
        );

        let media_type = plan.media_type;
        let mark_compliant = plan.action == PlanAction::Rename;
        let keep_old = !transfer.source_removed;
        let (media_type, rebased) = self.inventory.write(|state| {
            relocate_in(state, source, target, media_type, keep_old, mark_compliant)
        })?;
        for record in &rebased {
            debug!(?record, "canonical path updated and flagged dirty");
        }

        Ok(Applied::Done {
            reclaimed: 0,
            relocated: Some(Relocated {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                media_type,
            }),
        })
    }

    /// Resolves a conflict once the latest plan for every source path in its
    /// scope completed. Earlier attempts that failed were superseded by a re-plan.
    fn settle_conflict(&self, conflict_id: i64) -> Result<()> {
        let plans = self.inventory.plans_in_scope(PlanScope::Conflict(conflict_id))?;
        // Plans come back in id order, so a later attempt replaces an earlier one.
        let mut latest = BTreeMap::new();
        for plan in &plans {
            latest.insert(&plan.source_path, plan);
        }
        let Some(target_root) = plans.iter().rev().find_map(|plan| plan.target_root.clone()) else {
            return Ok(());
        };
        if latest
            .values()
            .all(|plan| plan.status == PlanStatus::Completed)
        {
            let conflict = resolve_conflict(self.inventory, conflict_id, &target_root)?;
            info!(
                conflict_id,
                title = %conflict.title,
                path = %target_root.display(),
                "conflict resolved"
            );
        }
        Ok(())
    }

    fn notify_batch(&self, relocations: &[Relocated]) {
        let Some(notifier) = self.notifier else {
            return;
        };
        if relocations.is_empty() {
            return;
        }
        let mut episodes = Vec::new();
        let mut movie_folders = BTreeSet::new();
        for moved in relocations {
            match moved.media_type {
                MediaType::Episode | MediaType::Series => episodes.push(moved.target.clone()),
                MediaType::Movie => {
                    if let Some(folder) = moved.target.parent() {
                        movie_folders.insert(folder.to_path_buf());
                    }
                }
            }
        }
        let movie_folders = movie_folders.into_iter().collect::<Vec<_>>();
        if let Err(err) = notifier.notify_bulk_complete(&episodes, &movie_folders) {
            warn!(error = %err, "catalog notification failed");
        }
    }
}

fn file_size(path: &Path) -> Result<Option<u64>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::io(path, err)),
    }
}

fn check_relocation(plan: &ConsolidationPlan) -> Result<&Path> {
    let target = plan.target_path.as_deref().ok_or_else(|| {
        EngineError::Transfer(format!("{} plan {} has no target path", plan.action, plan.id))
    })?;
    if file_size(&plan.source_path)?.is_none() {
        return Err(EngineError::SourceMissing(plan.source_path.clone()));
    }
    if file_size(target)?.is_some() {
        return Err(EngineError::DestinationExists(target.to_path_buf()));
    }
    Ok(target)
}

fn title_folder(path: &Path, media_type: MediaType) -> Option<&Path> {
    match media_type {
        MediaType::Movie => path.parent(),
        MediaType::Series | MediaType::Episode => path.parent().and_then(Path::parent),
    }
}

fn relocate_in(
    state: &mut InventoryState,
    old: &Path,
    new: &Path,
    planned_type: Option<MediaType>,
    keep_old: bool,
    mark_compliant: bool,
) -> Result<(MediaType, Vec<RecordRef>)> {
    let record = if keep_old {
        state.files.get(old).cloned()
    } else {
        state.files.remove(old)
    };
    let media_type = planned_type
        .or_else(|| record.as_ref().map(|file| file.media_type))
        .unwrap_or_default();

    if let Some(mut file) = record {
        file.path = new.to_path_buf();
        if mark_compliant {
            file.is_compliant = true;
            file.compliance_issues.clear();
        }
        if keep_old {
            state.upsert_file(file);
        } else {
            file.updated_at = Utc::now();
            state.files.insert(new.to_path_buf(), file);
        }
    }

    if keep_old {
        return Ok((media_type, Vec::new()));
    }
    let (Some(old_folder), Some(new_folder)) =
        (title_folder(old, media_type), title_folder(new, media_type))
    else {
        return Ok((media_type, Vec::new()));
    };
    if old_folder == new_folder {
        return Ok((media_type, Vec::new()));
    }

    let now = Utc::now();
    let mut rebased = Vec::new();
    match media_type {
        MediaType::Movie => {
            for movie in state.movies.values_mut() {
                if movie.canonical_path == old_folder {
                    movie.canonical_path = new_folder.to_path_buf();
                    movie.updated_at = now;
                    rebased.push(RecordRef::Movie(movie.id));
                }
            }
        }
        MediaType::Series | MediaType::Episode => {
            for series in state.series.values_mut() {
                if series.canonical_path == old_folder {
                    series.canonical_path = new_folder.to_path_buf();
                    series.updated_at = now;
                    rebased.push(RecordRef::Series(series.id));
                }
            }
        }
    }
    for record in &rebased {
        flag_dirty(state, *record, record.default_system())?;
    }
    Ok((media_type, rebased))
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::path::{Path, PathBuf};

    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use super::Executor;
    use crate::cancel::CancellationToken;
    use crate::config::EngineConfig;
    use crate::dirty::is_dirty;
    use crate::error::{EngineError, Result};
    use crate::inventory::Inventory;
    use crate::model::{
        Conflict, MediaFile, MediaType, PlanAction, PlanDraft, PlanScope, PlanStatus, RecordRef,
        Series,
    };
    use crate::notify::{CatalogClient, CatalogEntry, Notifier};
    use crate::transfer::NativeTransferer;

    #[derive(Clone, Default)]
    struct ShowCatalog {
        refreshed: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl CatalogClient for ShowCatalog {
        fn name(&self) -> &'static str {
            "shows"
        }

        fn find_by_path(&self, folder: &Path) -> Result<Option<CatalogEntry>> {
            Ok(Some(CatalogEntry {
                id: 1,
                title: "Silo".to_string(),
                path: folder.to_path_buf(),
            }))
        }

        fn refresh(&self, entry: &CatalogEntry) -> Result<()> {
            self.refreshed.lock().expect("lock").push(entry.path.clone());
            Ok(())
        }
    }

    fn silo_conflict(inventory: &Inventory, lib1: &Path, lib2: &Path) -> i64 {
        inventory
            .write(|state| {
                Ok(state.insert_conflict(Conflict {
                    media_type: MediaType::Series,
                    title: "Silo".to_string(),
                    title_normalized: "silo".to_string(),
                    year: Some(2023),
                    locations: vec![lib1.to_path_buf(), lib2.to_path_buf()],
                    ..Conflict::default()
                }))
            })
            .expect("conflict")
    }

    fn conflict_move(conflict_id: i64, root: &Path, source: &Path, target: &Path) -> PlanDraft {
        PlanDraft {
            scope: PlanScope::Conflict(conflict_id),
            media_type: Some(MediaType::Episode),
            target_root: Some(root.to_path_buf()),
            ..draft(PlanAction::Move, source, Some(target.to_path_buf()))
        }
    }

    fn write_file(path: &Path, len: u64) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        File::create(path).expect("create").set_len(len).expect("size");
    }

    fn draft(action: PlanAction, source: &Path, target: Option<PathBuf>) -> PlanDraft {
        PlanDraft {
            action,
            scope: PlanScope::Duplicates,
            media_type: Some(MediaType::Movie),
            source_file_id: None,
            source_path: source.to_path_buf(),
            target_path: target,
            target_root: None,
            size_bytes: 0,
            reason: "test".to_string(),
            reason_details: None,
        }
    }

    #[test]
    fn delete_of_missing_file_completes() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let gone = dir.path().join("Her (2013)/Her.mkv");
        inventory
            .upsert_file(MediaFile::new(&gone, 10, MediaType::Movie))
            .expect("file");
        let id = inventory
            .insert_plan(draft(PlanAction::Delete, &gone, None))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("execute");

        assert_eq!(result.plans_succeeded, 1);
        assert_eq!(result.space_reclaimed, 0);
        let plan = inventory.get_plan(id).expect("get").expect("plan");
        assert_eq!(plan.status, PlanStatus::Completed);
        assert!(plan.executed_at.is_some());
        assert!(inventory.get_file(&gone).expect("get").is_none());
    }

    #[test]
    fn delete_removes_file_and_record() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let path = dir.path().join("Her (2013)/Her.web.mkv");
        write_file(&path, 4096);
        inventory
            .upsert_file(MediaFile::new(&path, 4096, MediaType::Movie))
            .expect("file");
        inventory
            .insert_plan(draft(PlanAction::Delete, &path, None))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("execute");

        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.space_reclaimed, 4096);
        assert!(!path.exists());
        assert!(inventory.get_file(&path).expect("get").is_none());
    }

    #[test]
    fn move_onto_existing_destination_fails_without_touching_files() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let source = dir.path().join("a/Her (2013)/Her.mkv");
        let target = dir.path().join("b/Her (2013)/Her.mkv");
        write_file(&source, 2048);
        write_file(&target, 16);
        let id = inventory
            .insert_plan(draft(PlanAction::Move, &source, Some(target.clone())))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let err = executor.execute_plan_by_id(id).expect_err("must fail");
        assert!(matches!(err, EngineError::DestinationExists(_)));

        assert_eq!(fs::metadata(&source).expect("source").len(), 2048);
        assert_eq!(fs::metadata(&target).expect("target").len(), 16);
        let plan = inventory.get_plan(id).expect("get").expect("plan");
        assert_eq!(plan.status, PlanStatus::Failed);
        assert!(plan.error_message.expect("message").contains("already exists"));

        let again = executor.execute_plan_by_id(id).expect_err("terminal");
        assert!(matches!(again, EngineError::PlanNotPending { .. }));
    }

    #[test]
    fn move_of_missing_source_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let source = dir.path().join("a/missing.mkv");
        inventory
            .insert_plan(draft(
                PlanAction::Move,
                &source,
                Some(dir.path().join("b/missing.mkv")),
            ))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("batch");
        assert_eq!(result.plans_failed, 1);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn rename_marks_destination_compliant() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let source = dir.path().join("Her (2013)/her.2013.mkv");
        let target = dir.path().join("Her (2013)/Her (2013).mkv");
        write_file(&source, 512);
        let mut file = MediaFile::new(&source, 512, MediaType::Movie);
        file.is_compliant = false;
        file.compliance_issues = vec!["filename does not match folder".to_string()];
        let file_id = inventory.upsert_file(file).expect("file");
        inventory
            .insert_plan(draft(PlanAction::Rename, &source, Some(target.clone())))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("execute");

        assert_eq!(result.files_renamed, 1);
        assert!(inventory.get_file(&source).expect("get").is_none());
        let renamed = inventory.get_file(&target).expect("get").expect("renamed");
        assert_eq!(renamed.id, file_id);
        assert!(renamed.is_compliant);
        assert!(renamed.compliance_issues.is_empty());
    }

    #[test]
    fn conflict_move_rebases_series_and_resolves_conflict() {
        let dir = TempDir::new().expect("tempdir");
        let lib1 = dir.path().join("lib1/Silo (2023)");
        let lib2 = dir.path().join("lib2/Silo (2023)");
        let source = lib2.join("Season 01/Silo S01E04.mkv");
        let target = lib1.join("Season 01/Silo S01E04.mkv");
        write_file(&source, 1024);

        let inventory = Inventory::in_memory();
        let series = inventory
            .insert_series(Series {
                title: "Silo".to_string(),
                year: Some(2023),
                canonical_path: lib2.clone(),
                ..Series::default()
            })
            .expect("series");
        let conflict_id = silo_conflict(&inventory, &lib1, &lib2);
        inventory
            .insert_plan(conflict_move(conflict_id, &lib1, &source, &target))
            .expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("execute");

        assert_eq!(result.files_moved, 1);
        assert!(target.exists());
        assert!(!source.exists());
        let series_row = inventory.get_series(series).expect("get").expect("series");
        assert_eq!(series_row.canonical_path, lib1);
        assert!(is_dirty(&inventory, RecordRef::Series(series)).expect("dirty"));
        let conflict = inventory
            .get_conflict(conflict_id)
            .expect("get")
            .expect("conflict");
        assert!(conflict.resolved);
        assert_eq!(conflict.resolved_path, Some(lib1));
    }

    #[test]
    fn retried_conflict_move_resolves_after_earlier_failure() {
        let dir = TempDir::new().expect("tempdir");
        let lib1 = dir.path().join("lib1/Silo (2023)");
        let lib2 = dir.path().join("lib2/Silo (2023)");
        let source = lib2.join("Season 01/Silo S01E04.mkv");
        let target = lib1.join("Season 01/Silo S01E04.mkv");
        write_file(&source, 1024);
        write_file(&target, 16);

        let inventory = Inventory::in_memory();
        let conflict_id = silo_conflict(&inventory, &lib1, &lib2);
        inventory
            .insert_plan(conflict_move(conflict_id, &lib1, &source, &target))
            .expect("plan");
        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let first = executor.execute_plans(None).into_result().expect("first run");
        assert_eq!(first.plans_failed, 1);
        let open = inventory.get_conflict(conflict_id).expect("get").expect("conflict");
        assert!(!open.resolved);

        fs::remove_file(&target).expect("remove blocker");
        inventory
            .clear_pending(PlanScope::Conflict(conflict_id))
            .expect("clear");
        inventory
            .insert_plan(conflict_move(conflict_id, &lib1, &source, &target))
            .expect("replan");
        let retry = executor.execute_plans(None).into_result().expect("retry");
        assert_eq!(retry.plans_succeeded, 1);
        assert!(target.exists());
        assert!(!source.exists());

        let history = inventory
            .plans_in_scope(PlanScope::Conflict(conflict_id))
            .expect("scope");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, PlanStatus::Failed);
        let conflict = inventory.get_conflict(conflict_id).expect("get").expect("conflict");
        assert!(conflict.resolved);
        assert_eq!(conflict.resolved_path, Some(lib1));
    }

    #[test]
    fn conflict_stays_open_while_a_source_is_still_unmoved() {
        let dir = TempDir::new().expect("tempdir");
        let lib1 = dir.path().join("lib1/Silo (2023)");
        let lib2 = dir.path().join("lib2/Silo (2023)");
        let moved = lib2.join("Season 01/Silo S01E04.mkv");
        let stuck = lib2.join("Season 01/Silo S01E05.mkv");
        write_file(&moved, 1024);
        write_file(&stuck, 1024);
        write_file(&lib1.join("Season 01/Silo S01E05.mkv"), 16);

        let inventory = Inventory::in_memory();
        let conflict_id = silo_conflict(&inventory, &lib1, &lib2);
        for source in [&moved, &stuck] {
            let target = lib1.join("Season 01").join(source.file_name().expect("name"));
            inventory
                .insert_plan(conflict_move(conflict_id, &lib1, source, &target))
                .expect("plan");
        }
        let transferer = NativeTransferer;
        let result = Executor::new(&inventory, &transferer, &EngineConfig::default())
            .execute_plans(None)
            .into_result()
            .expect("execute");

        assert_eq!(result.plans_succeeded, 1);
        assert_eq!(result.plans_failed, 1);
        let conflict = inventory.get_conflict(conflict_id).expect("get").expect("conflict");
        assert!(!conflict.resolved);
    }

    #[test]
    fn stale_plan_copy_is_not_applied_twice() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let path = dir.path().join("Her (2013)/Her.web.mkv");
        write_file(&path, 64);
        let id = inventory
            .insert_plan(draft(PlanAction::Delete, &path, None))
            .expect("plan");
        let stale = inventory.get_plan(id).expect("get").expect("plan");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        executor.execute_plan(&stale).expect("first run");
        assert!(!path.exists());

        write_file(&path, 64);
        let err = executor.execute_plan(&stale).expect_err("already completed");
        assert!(matches!(
            err,
            EngineError::PlanNotPending {
                status: PlanStatus::Completed,
                ..
            }
        ));
        assert!(path.exists());
    }

    #[test]
    fn disk_delete_is_kept_when_the_inventory_cannot_be_written() {
        let dir = TempDir::new().expect("tempdir");
        let snapshot = dir.path().join("inventory.json");
        let path = dir.path().join("Her (2013)/Her.web.mkv");
        write_file(&path, 4096);
        let inventory = Inventory::open(&snapshot).expect("open");
        inventory
            .upsert_file(MediaFile::new(&path, 4096, MediaType::Movie))
            .expect("file");
        let id = inventory
            .insert_plan(draft(PlanAction::Delete, &path, None))
            .expect("plan");

        // A non-empty directory where the snapshot lives makes every persist fail.
        fs::remove_file(&snapshot).expect("remove snapshot");
        fs::create_dir_all(snapshot.join("blocker")).expect("block snapshot");

        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let result = executor.execute_plans(None).into_result().expect("batch");
        assert_eq!(result.plans_failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("was removed from disk"));
        assert!(!path.exists());
        assert!(inventory.get_file(&path).expect("get").is_some());

        fs::remove_dir_all(&snapshot).expect("unblock snapshot");
        let retry = executor.execute_plans(None).into_result().expect("retry");
        assert_eq!(retry.plans_succeeded, 1);
        assert_eq!(retry.space_reclaimed, 0);
        assert!(!path.exists());
        assert!(inventory.get_file(&path).expect("get").is_none());
        let plan = inventory.get_plan(id).expect("get").expect("plan");
        assert_eq!(plan.status, PlanStatus::Completed);
    }

    #[test]
    fn batch_refreshes_each_show_folder_once() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let show = dir.path().join("lib1/Silo (2023)");
        for episode in 1..=2 {
            let name = format!("Silo S01E{episode:02}.mkv");
            let source = dir.path().join("lib2/Silo (2023)/Season 01").join(&name);
            write_file(&source, 128);
            inventory
                .insert_plan(PlanDraft {
                    media_type: Some(MediaType::Episode),
                    ..draft(PlanAction::Move, &source, Some(show.join("Season 01").join(&name)))
                })
                .expect("plan");
        }

        let catalog = ShowCatalog::default();
        let notifier = Notifier::new(false).with_series_client(Box::new(catalog.clone()));
        let transferer = NativeTransferer;
        let result = Executor::new(&inventory, &transferer, &EngineConfig::default())
            .with_notifier(&notifier)
            .execute_plans(None)
            .into_result()
            .expect("execute");

        assert_eq!(result.files_moved, 2);
        assert_eq!(*catalog.refreshed.lock().expect("lock"), vec![show]);
    }

    #[test]
    fn dry_run_reports_without_mutating() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let doomed = dir.path().join("Her (2013)/Her.web.mkv");
        let source = dir.path().join("a/Silo S01E01.mkv");
        let target = dir.path().join("b/Silo S01E01.mkv");
        write_file(&doomed, 300);
        write_file(&source, 200);
        let delete_id = inventory
            .insert_plan(draft(PlanAction::Delete, &doomed, None))
            .expect("plan");
        inventory
            .insert_plan(draft(PlanAction::Move, &source, Some(target.clone())))
            .expect("plan");

        let config = EngineConfig {
            dry_run: true,
            ..EngineConfig::default()
        };
        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &config);
        let result = executor.execute_plans(None).into_result().expect("execute");

        assert!(result.dry_run);
        assert_eq!(result.dry_run_actions.len(), 2);
        assert_eq!(result.dry_run_actions[0].action, PlanAction::Move);
        assert_eq!(result.files_deleted, 1);
        assert_eq!(result.space_reclaimed, 300);
        assert!(doomed.exists());
        assert!(source.exists());
        assert!(!target.exists());
        assert!(!target.parent().expect("parent").exists());
        let plan = inventory.get_plan(delete_id).expect("get").expect("plan");
        assert_eq!(plan.status, PlanStatus::Pending);
    }

    #[test]
    fn cancelled_batch_keeps_remaining_plans_pending() {
        let dir = TempDir::new().expect("tempdir");
        let inventory = Inventory::in_memory();
        let id = inventory
            .insert_plan(draft(PlanAction::Delete, &dir.path().join("x.mkv"), None))
            .expect("plan");

        let token = CancellationToken::new();
        token.cancel();
        let transferer = NativeTransferer;
        let executor = Executor::new(&inventory, &transferer, &EngineConfig::default());
        let outcome = executor.execute_plans(Some(&token));

        assert!(outcome.error.as_ref().is_some_and(EngineError::is_cancellation));
        assert_eq!(outcome.value.plans_executed, 0);
        let plan = inventory.get_plan(id).expect("get").expect("plan");
        assert_eq!(plan.status, PlanStatus::Pending);
    }
}
