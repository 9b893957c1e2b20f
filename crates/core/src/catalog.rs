use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertDecision {
    Insert,
    Overwrite {
        previous_path: PathBuf,
        path_changed: bool,
    },
    Ignore,
}

impl UpsertDecision {
    pub fn changes_path(&self) -> bool {
        matches!(
            self,
            Self::Overwrite {
                path_changed: true,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Existing<'a> {
    pub path: &'a Path,
    pub source_priority: i32,
}

/// Equal or higher priority wins; lower priority never touches the record.
pub fn decide(existing: Option<Existing<'_>>, path: &Path, source_priority: i32) -> UpsertDecision {
    let Some(existing) = existing else {
        return UpsertDecision::Insert;
    };
    if source_priority < existing.source_priority {
        return UpsertDecision::Ignore;
    }
    UpsertDecision::Overwrite {
        previous_path: existing.path.to_path_buf(),
        path_changed: existing.path != path,
    }
}
