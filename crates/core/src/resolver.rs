use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::identity::MediaIdentity;
use crate::model::{DuplicateGroup, MediaFile};

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub best: MediaFile,
    pub inferior: Vec<MediaFile>,
}

pub fn rank(a: &MediaFile, b: &MediaFile) -> Ordering {
    b.quality_score
        .cmp(&a.quality_score)
        .then_with(|| b.size_bytes.cmp(&a.size_bytes))
        .then_with(|| a.path.cmp(&b.path))
}

pub fn resolve(files: &[MediaFile]) -> Option<Selection> {
    let mut ranked = files.to_vec();
    ranked.sort_by(rank);

    let mut iter = ranked.into_iter();
    let best = iter.next()?;
    Some(Selection {
        best,
        inferior: iter.collect(),
    })
}

pub fn build_group(identity: &MediaIdentity, files: &[MediaFile]) -> Option<DuplicateGroup> {
    let Selection { best, inferior } = resolve(files)?;
    if inferior.is_empty() {
        return None;
    }
    let space_reclaimable = inferior.iter().map(|file| file.size_bytes).sum();
    Some(DuplicateGroup {
        media_type: identity.media_type,
        normalized_title: identity.normalized_title.clone(),
        year: identity.year,
        season: identity.season,
        episode: identity.episode,
        best,
        inferior,
        space_reclaimable,
    })
}

pub fn group_duplicates<'a, I>(files: I) -> Vec<DuplicateGroup>
where
    I: IntoIterator<Item = &'a MediaFile>,
{
    let mut by_identity: BTreeMap<MediaIdentity, Vec<MediaFile>> = BTreeMap::new();
    for file in files {
        by_identity
            .entry(MediaIdentity::for_file(file))
            .or_default()
            .push(file.clone());
    }

    by_identity
        .iter()
        .filter(|(_, files)| files.len() > 1)
        .filter_map(|(identity, files)| build_group(identity, files))
        .collect()
}
