use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::inventory::{Inventory, InventoryState};
use crate::model::{DownstreamSystem, RecordRef, SyncFlags};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirtyRecord {
    pub record: RecordRef,
    pub title: String,
    pub canonical_path: PathBuf,
    pub source_priority: i32,
    pub systems: Vec<DownstreamSystem>,
}

pub fn set_dirty(inventory: &Inventory, record: RecordRef, system: DownstreamSystem) -> Result<()> {
    inventory.write(|state| flag_dirty(state, record, system))?;
    debug!(?record, ?system, "marked dirty");
    Ok(())
}

pub fn mark_synced(inventory: &Inventory, record: RecordRef) -> Result<()> {
    inventory.write(|state| {
        let now = Utc::now();
        for sync in sync_flags_mut(state, record)?.values_mut() {
            sync.dirty = false;
            sync.synced_at = Some(now);
        }
        Ok(())
    })
}

pub fn get_dirty(inventory: &Inventory) -> Result<Vec<DirtyRecord>> {
    inventory.read(|state| {
        let series = state.series.values().filter_map(|series| {
            dirty_record(
                RecordRef::Series(series.id),
                &series.title,
                &series.canonical_path,
                series.source_priority,
                &series.sync,
            )
        });
        let movies = state.movies.values().filter_map(|movie| {
            dirty_record(
                RecordRef::Movie(movie.id),
                &movie.title,
                &movie.canonical_path,
                movie.source_priority,
                &movie.sync,
            )
        });

        let mut records = series.chain(movies).collect::<Vec<_>>();
        records.sort_by(|a, b| {
            b.source_priority
                .cmp(&a.source_priority)
                .then_with(|| a.record.cmp(&b.record))
        });
        records
    })
}

pub fn is_dirty(inventory: &Inventory, record: RecordRef) -> Result<bool> {
    let dirty = inventory.read(|state| match record {
        RecordRef::Series(id) => state.series.get(&id).map(|series| any_dirty(&series.sync)),
        RecordRef::Movie(id) => state.movies.get(&id).map(|movie| any_dirty(&movie.sync)),
    })?;
    dirty.ok_or_else(|| EngineError::RecordNotFound(format!("{record:?}")))
}

pub(crate) fn flag_dirty(
    state: &mut InventoryState,
    record: RecordRef,
    system: DownstreamSystem,
) -> Result<()> {
    sync_flags_mut(state, record)?.entry(system).or_default().dirty = true;
    Ok(())
}

fn sync_flags_mut(state: &mut InventoryState, record: RecordRef) -> Result<&mut SyncFlags> {
    let flags = match record {
        RecordRef::Series(id) => state.series.get_mut(&id).map(|series| &mut series.sync),
        RecordRef::Movie(id) => state.movies.get_mut(&id).map(|movie| &mut movie.sync),
    };
    flags.ok_or_else(|| EngineError::RecordNotFound(format!("{record:?}")))
}

fn any_dirty(flags: &SyncFlags) -> bool {
    flags.values().any(|sync| sync.dirty)
}

fn dirty_record(
    record: RecordRef,
    title: &str,
    canonical_path: &Path,
    source_priority: i32,
    flags: &SyncFlags,
) -> Option<DirtyRecord> {
    let systems = flags
        .iter()
        .filter(|(_, sync)| sync.dirty)
        .map(|(system, _)| *system)
        .collect::<Vec<_>>();
    if systems.is_empty() {
        return None;
    }
    Some(DirtyRecord {
        record,
        title: title.to_string(),
        canonical_path: canonical_path.to_path_buf(),
        source_priority,
        systems,
    })
}
