use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::catalog::{decide, Existing, UpsertDecision};
use crate::config::EngineConfig;
use crate::dirty::flag_dirty;
use crate::error::{EngineError, Result};
use crate::identity::normalize_title;
use crate::inventory::{Inventory, InventoryState};
use crate::model::{Conflict, MediaType, Movie, RecordRef, Series};

type IdentityKey = (MediaType, String, Option<i32>);

pub fn detect_conflicts(inventory: &Inventory) -> Result<Vec<Conflict>> {
    let conflicts = inventory.write(|state| {
        let mut sightings: BTreeMap<IdentityKey, (String, Vec<PathBuf>)> = BTreeMap::new();
        let series = state.series.values().map(|series| {
            (
                (MediaType::Series, series.title_normalized.clone(), series.year),
                &series.title,
                &series.canonical_path,
            )
        });
        let movies = state.movies.values().map(|movie| {
            (
                (MediaType::Movie, movie.title_normalized.clone(), movie.year),
                &movie.title,
                &movie.canonical_path,
            )
        });
        for (key, title, path) in series.chain(movies) {
            let (_, paths) = sightings
                .entry(key)
                .or_insert_with(|| (title.clone(), Vec::new()));
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }

        let mut touched = Vec::new();
        for ((media_type, title_normalized, year), (title, paths)) in sightings {
            if paths.len() < 2 {
                continue;
            }

            if let Some(conflict) = state.unresolved_conflict_mut(media_type, &title_normalized, year)
            {
                for path in &paths {
                    conflict.add_location(path);
                }
                touched.push(conflict.clone());
                continue;
            }

            let settled = state
                .latest_conflict(media_type, &title_normalized, year)
                .is_some_and(|conflict| {
                    conflict.resolved && paths.iter().all(|path| conflict.locations.contains(path))
                });
            if settled {
                continue;
            }

            let id = state.insert_conflict(Conflict {
                media_type,
                title,
                title_normalized,
                year,
                locations: paths,
                ..Conflict::default()
            });
            if let Some(conflict) = state.conflicts.get(&id) {
                touched.push(conflict.clone());
            }
        }
        Ok(touched)
    })?;

    info!(conflicts = conflicts.len(), "conflict scan complete");
    Ok(conflicts)
}

pub fn record_conflict(
    inventory: &Inventory,
    media_type: MediaType,
    title: &str,
    year: Option<i32>,
    existing_path: &Path,
    new_path: &Path,
) -> Result<Option<Conflict>> {
    inventory.write(|state| {
        Ok(record_conflict_in(
            state,
            media_type,
            title,
            year,
            existing_path,
            new_path,
        ))
    })
}

pub(crate) fn record_conflict_in(
    state: &mut InventoryState,
    media_type: MediaType,
    title: &str,
    year: Option<i32>,
    existing_path: &Path,
    new_path: &Path,
) -> Option<Conflict> {
    if existing_path == new_path {
        return None;
    }
    let title_normalized = normalize_title(title);

    if let Some(conflict) = state.unresolved_conflict_mut(media_type, &title_normalized, year) {
        conflict.add_location(existing_path);
        if conflict.add_location(new_path) {
            debug!(
                conflict_id = conflict.id,
                path = %new_path.display(),
                "conflict gained a location"
            );
        }
        return Some(conflict.clone());
    }

    let id = state.insert_conflict(Conflict {
        media_type,
        title: title.to_string(),
        title_normalized,
        year,
        locations: vec![existing_path.to_path_buf(), new_path.to_path_buf()],
        ..Conflict::default()
    });
    info!(
        conflict_id = id,
        %media_type,
        title,
        "recorded new conflict"
    );
    state.conflicts.get(&id).cloned()
}

pub fn resolve_conflict(inventory: &Inventory, id: i64, resolved_path: &Path) -> Result<Conflict> {
    inventory.write(|state| {
        let conflict = state
            .conflicts
            .get_mut(&id)
            .ok_or(EngineError::ConflictNotFound(id))?;
        if !conflict.resolved {
            conflict.resolved = true;
            conflict.resolved_at = Some(Utc::now());
            conflict.resolved_path = Some(resolved_path.to_path_buf());
        }
        Ok(conflict.clone())
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub decision: UpsertDecision,
    pub conflict: Option<Conflict>,
    pub marked_dirty: bool,
}

pub fn apply_series(
    inventory: &Inventory,
    incoming: Series,
    config: &EngineConfig,
) -> Result<UpsertOutcome> {
    inventory.write(|state| {
        let title_normalized = normalize_title(&incoming.title);
        let existing_id = state.find_series_id(&title_normalized, incoming.year);
        let decision = decide(
            existing_id
                .and_then(|id| state.series.get(&id))
                .map(|series| Existing {
                    path: &series.canonical_path,
                    source_priority: series.source_priority,
                }),
            &incoming.canonical_path,
            incoming.source_priority,
        );

        let id = match (existing_id, &decision) {
            (Some(id), UpsertDecision::Ignore) => id,
            (Some(id), UpsertDecision::Overwrite { .. }) => {
                if let Some(series) = state.series.get_mut(&id) {
                    series.title = incoming.title.clone();
                    series.canonical_path = incoming.canonical_path.clone();
                    series.library_root = incoming.library_root.clone();
                    series.source = incoming.source.clone();
                    series.source_priority = incoming.source_priority;
                    series.external_id = incoming.external_id.or(series.external_id);
                    series.updated_at = Utc::now();
                }
                id
            }
            _ => state.insert_series(Series {
                title_normalized,
                ..incoming.clone()
            }),
        };

        follow_up(
            state,
            RecordRef::Series(id),
            &incoming.title,
            incoming.year,
            &incoming.canonical_path,
            &incoming.source,
            decision,
            config,
        )
    })
}

pub fn apply_movie(
    inventory: &Inventory,
    incoming: Movie,
    config: &EngineConfig,
) -> Result<UpsertOutcome> {
    inventory.write(|state| {
        let title_normalized = normalize_title(&incoming.title);
        let existing_id = state.find_movie_id(&title_normalized, incoming.year);
        let decision = decide(
            existing_id
                .and_then(|id| state.movies.get(&id))
                .map(|movie| Existing {
                    path: &movie.canonical_path,
                    source_priority: movie.source_priority,
                }),
            &incoming.canonical_path,
            incoming.source_priority,
        );

        let id = match (existing_id, &decision) {
            (Some(id), UpsertDecision::Ignore) => id,
            (Some(id), UpsertDecision::Overwrite { .. }) => {
                if let Some(movie) = state.movies.get_mut(&id) {
                    movie.title = incoming.title.clone();
                    movie.canonical_path = incoming.canonical_path.clone();
                    movie.library_root = incoming.library_root.clone();
                    movie.source = incoming.source.clone();
                    movie.source_priority = incoming.source_priority;
                    movie.external_id = incoming.external_id.or(movie.external_id);
                    movie.updated_at = Utc::now();
                }
                id
            }
            _ => state.insert_movie(Movie {
                title_normalized,
                ..incoming.clone()
            }),
        };

        follow_up(
            state,
            RecordRef::Movie(id),
            &incoming.title,
            incoming.year,
            &incoming.canonical_path,
            &incoming.source,
            decision,
            config,
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn follow_up(
    state: &mut InventoryState,
    record: RecordRef,
    title: &str,
    year: Option<i32>,
    new_path: &Path,
    source: &str,
    decision: UpsertDecision,
    config: &EngineConfig,
) -> Result<UpsertOutcome> {
    let conflict = match &decision {
        UpsertDecision::Overwrite {
            previous_path,
            path_changed: true,
        } => record_conflict_in(
            state,
            record.media_type(),
            title,
            year,
            previous_path,
            new_path,
        ),
        _ => None,
    };

    let marked_dirty = decision.changes_path() && source == config.authoritative_source;
    if marked_dirty {
        flag_dirty(state, record, record.default_system())?;
    }

    let id = match record {
        RecordRef::Series(id) | RecordRef::Movie(id) => id,
    };
    Ok(UpsertOutcome {
        id,
        decision,
        conflict,
        marked_dirty,
    })
}
