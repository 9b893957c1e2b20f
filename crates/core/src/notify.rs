use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::{is_cancelled, CancellationToken};
use crate::dirty::{get_dirty, mark_synced};
use crate::error::{EngineError, Outcome, Result};
use crate::inventory::Inventory;
use crate::model::{MediaType, RecordRef};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: i64,
    pub title: String,
    pub path: PathBuf,
}

pub trait CatalogClient: Send + Sync {
    fn name(&self) -> &'static str;

    fn find_by_path(&self, folder: &Path) -> Result<Option<CatalogEntry>>;

    fn refresh(&self, entry: &CatalogEntry) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Refreshed(i64),
    NotFound,
    NotConfigured,
    DryRun,
}

#[derive(Default)]
pub struct Notifier {
    series: Option<Box<dyn CatalogClient>>,
    movies: Option<Box<dyn CatalogClient>>,
    dry_run: bool,
}

impl Notifier {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn with_series_client(mut self, client: Box<dyn CatalogClient>) -> Self {
        self.series = Some(client);
        self
    }

    pub fn with_movie_client(mut self, client: Box<dyn CatalogClient>) -> Self {
        self.movies = Some(client);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn notify_file_move(
        &self,
        old_path: &Path,
        new_path: &Path,
        media_type: MediaType,
    ) -> Result<NotifyOutcome> {
        if self.dry_run {
            info!(
                old = %old_path.display(),
                new = %new_path.display(),
                %media_type,
                "would notify"
            );
            return Ok(NotifyOutcome::DryRun);
        }
        let folder = match media_type {
            MediaType::Episode | MediaType::Series => show_folder(new_path),
            MediaType::Movie => new_path.parent(),
        };
        let Some(folder) = folder else {
            return Err(EngineError::Notification(format!(
                "no catalog folder above {}",
                new_path.display()
            )));
        };
        self.notify_folder(folder, media_type)
    }

    pub fn notify_folder(&self, folder: &Path, media_type: MediaType) -> Result<NotifyOutcome> {
        if self.dry_run {
            info!(folder = %folder.display(), %media_type, "would notify");
            return Ok(NotifyOutcome::DryRun);
        }
        let client = match media_type {
            MediaType::Episode | MediaType::Series => self.series.as_deref(),
            MediaType::Movie => self.movies.as_deref(),
        };
        let Some(client) = client else {
            debug!(%media_type, "no catalog configured; skipping notification");
            return Ok(NotifyOutcome::NotConfigured);
        };

        let Some(entry) = client.find_by_path(folder)? else {
            warn!(
                catalog = client.name(),
                folder = %folder.display(),
                "folder not found in catalog"
            );
            return Ok(NotifyOutcome::NotFound);
        };
        info!(
            catalog = client.name(),
            title = %entry.title,
            id = entry.id,
            "triggering catalog refresh"
        );
        client.refresh(&entry)?;
        Ok(NotifyOutcome::Refreshed(entry.id))
    }

    pub fn notify_bulk_complete(
        &self,
        episode_paths: &[PathBuf],
        movie_folders: &[PathBuf],
    ) -> Result<()> {
        if self.dry_run {
            info!(
                tv_paths = episode_paths.len(),
                movie_paths = movie_folders.len(),
                "would trigger bulk scans"
            );
            return Ok(());
        }

        let shows = episode_paths
            .iter()
            .filter_map(|path| show_folder(path))
            .collect::<BTreeSet<_>>();
        let mut failures = Vec::new();
        for folder in shows {
            if let Err(err) = self.notify_folder(folder, MediaType::Episode) {
                failures.push(format!("{}: {err}", folder.display()));
            }
        }
        for folder in movie_folders {
            if let Err(err) = self.notify_folder(folder, MediaType::Movie) {
                failures.push(format!("{}: {err}", folder.display()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Notification(format!(
                "some notifications failed: {}",
                failures.join("; ")
            )))
        }
    }
}

fn show_folder(path: &Path) -> Option<&Path> {
    path.parent().and_then(Path::parent)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncReport {
    pub synced: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

/// Notifies the catalog of every dirty record and clears its flags on success.
/// Failed or skipped records stay dirty for the next pass.
pub fn sync_dirty(
    inventory: &Inventory,
    notifier: &Notifier,
    cancel: Option<&CancellationToken>,
) -> Outcome<SyncReport> {
    let mut report = SyncReport::default();
    let records = match get_dirty(inventory) {
        Ok(records) => records,
        Err(err) => return Outcome::partial(report, err),
    };

    for record in records {
        if is_cancelled(cancel) {
            return Outcome::partial(report, EngineError::Cancelled);
        }
        let media_type = match record.record {
            RecordRef::Series(_) => MediaType::Series,
            RecordRef::Movie(_) => MediaType::Movie,
        };
        match notifier.notify_folder(&record.canonical_path, media_type) {
            Ok(NotifyOutcome::Refreshed(_) | NotifyOutcome::NotFound) => {
                if let Err(err) = mark_synced(inventory, record.record) {
                    return Outcome::partial(report, err);
                }
                report.synced += 1;
            }
            Ok(NotifyOutcome::NotConfigured | NotifyOutcome::DryRun) => report.skipped += 1,
            Err(err) => {
                warn!(record = ?record.record, error = %err, "sync notification failed");
                report.failed += 1;
                report.errors.push(format!("{}: {err}", record.title));
            }
        }
    }

    info!(
        synced = report.synced,
        skipped = report.skipped,
        failed = report.failed,
        "dirty record sync complete"
    );
    Outcome::complete(report)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use super::{sync_dirty, CatalogClient, CatalogEntry, Notifier, NotifyOutcome};
    use crate::dirty::{get_dirty, set_dirty};
    use crate::error::{EngineError, Result};
    use crate::inventory::Inventory;
    use crate::model::{DownstreamSystem, MediaType, Movie, RecordRef, Series};

    #[derive(Clone, Default)]
    struct FakeCatalog {
        known: Vec<PathBuf>,
        looked_up: Arc<Mutex<Vec<PathBuf>>>,
        refreshed: Arc<Mutex<Vec<i64>>>,
        fail_refresh: bool,
    }

    impl CatalogClient for FakeCatalog {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn find_by_path(&self, folder: &Path) -> Result<Option<CatalogEntry>> {
            self.looked_up
                .lock()
                .expect("lock")
                .push(folder.to_path_buf());
            Ok(self
                .known
                .iter()
                .position(|known| known == folder)
                .map(|index| CatalogEntry {
                    id: index as i64 + 1,
                    title: "entry".to_string(),
                    path: folder.to_path_buf(),
                }))
        }

        fn refresh(&self, entry: &CatalogEntry) -> Result<()> {
            if self.fail_refresh {
                return Err(EngineError::Notification("catalog offline".to_string()));
            }
            self.refreshed.lock().expect("lock").push(entry.id);
            Ok(())
        }
    }

    #[test]
    fn episode_moves_refresh_the_show_folder() {
        let catalog = FakeCatalog {
            known: vec!["/lib1/Silo (2023)".into()],
            ..FakeCatalog::default()
        };
        let notifier = Notifier::new(false).with_series_client(Box::new(catalog.clone()));
        let outcome = notifier
            .notify_file_move(
                Path::new("/lib2/Silo (2023)/Season 01/S01E01.mkv"),
                Path::new("/lib1/Silo (2023)/Season 01/S01E01.mkv"),
                MediaType::Episode,
            )
            .expect("notify");
        assert_eq!(outcome, NotifyOutcome::Refreshed(1));
        assert_eq!(*catalog.refreshed.lock().expect("lock"), vec![1]);
    }

    #[test]
    fn unknown_folder_and_missing_client_are_no_ops() {
        let catalog = FakeCatalog::default();
        let notifier = Notifier::new(false).with_movie_client(Box::new(catalog.clone()));
        let outcome = notifier
            .notify_file_move(
                Path::new("/a/Her (2013)/Her.mkv"),
                Path::new("/b/Her (2013)/Her.mkv"),
                MediaType::Movie,
            )
            .expect("notify");
        assert_eq!(outcome, NotifyOutcome::NotFound);
        assert_eq!(
            *catalog.looked_up.lock().expect("lock"),
            vec![PathBuf::from("/b/Her (2013)")]
        );

        let silent = notifier
            .notify_folder(Path::new("/lib/Silo"), MediaType::Series)
            .expect("notify");
        assert_eq!(silent, NotifyOutcome::NotConfigured);
    }

    #[test]
    fn dry_run_never_calls_the_catalog() {
        let catalog = FakeCatalog {
            known: vec!["/b/Her (2013)".into()],
            ..FakeCatalog::default()
        };
        let notifier = Notifier::new(true).with_movie_client(Box::new(catalog.clone()));
        let outcome = notifier
            .notify_file_move(
                Path::new("/a/Her (2013)/Her.mkv"),
                Path::new("/b/Her (2013)/Her.mkv"),
                MediaType::Movie,
            )
            .expect("notify");
        assert_eq!(outcome, NotifyOutcome::DryRun);
        assert!(catalog.looked_up.lock().expect("lock").is_empty());
    }

    #[test]
    fn bulk_completion_dedupes_show_folders() {
        let catalog = FakeCatalog {
            known: vec!["/lib1/Silo".into()],
            ..FakeCatalog::default()
        };
        let notifier = Notifier::new(false).with_series_client(Box::new(catalog.clone()));
        notifier
            .notify_bulk_complete(
                &[
                    "/lib1/Silo/Season 01/S01E01.mkv".into(),
                    "/lib1/Silo/Season 01/S01E02.mkv".into(),
                ],
                &[],
            )
            .expect("bulk");
        assert_eq!(catalog.looked_up.lock().expect("lock").len(), 1);
    }

    #[test]
    fn sync_clears_flags_only_on_success() {
        let inventory = Inventory::in_memory();
        let series = inventory
            .insert_series(Series {
                title: "Silo".to_string(),
                canonical_path: "/lib1/Silo".into(),
                ..Series::default()
            })
            .expect("series");
        let movie = inventory
            .insert_movie(Movie {
                title: "Her".to_string(),
                canonical_path: "/movies/Her (2013)".into(),
                ..Movie::default()
            })
            .expect("movie");
        set_dirty(&inventory, RecordRef::Series(series), DownstreamSystem::Sonarr).expect("dirty");
        set_dirty(&inventory, RecordRef::Movie(movie), DownstreamSystem::Radarr).expect("dirty");

        let shows = FakeCatalog {
            known: vec!["/lib1/Silo".into()],
            ..FakeCatalog::default()
        };
        let films = FakeCatalog {
            known: vec!["/movies/Her (2013)".into()],
            fail_refresh: true,
            ..FakeCatalog::default()
        };
        let notifier = Notifier::new(false)
            .with_series_client(Box::new(shows))
            .with_movie_client(Box::new(films));

        let report = sync_dirty(&inventory, &notifier, None)
            .into_result()
            .expect("sync");
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);

        let still_dirty = get_dirty(&inventory).expect("dirty");
        assert_eq!(still_dirty.len(), 1);
        assert_eq!(still_dirty[0].record, RecordRef::Movie(movie));
    }
}
