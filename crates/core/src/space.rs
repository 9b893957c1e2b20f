use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sysinfo::Disks;

pub trait SpaceProbe {
    fn free_space(&self, path: &Path) -> Option<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemSpaceProbe {
    mounts: Vec<(PathBuf, u64)>,
}

impl SystemSpaceProbe {
    pub fn refresh() -> Self {
        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
            .collect();
        Self { mounts }
    }
}

impl SpaceProbe for SystemSpaceProbe {
    fn free_space(&self, path: &Path) -> Option<u64> {
        longest_mount(path, self.mounts.iter().map(|(mount, free)| (mount.as_path(), *free)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSpaceProbe {
    entries: BTreeMap<PathBuf, u64>,
}

impl StaticSpaceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prefix: impl Into<PathBuf>, free_bytes: u64) -> Self {
        self.entries.insert(prefix.into(), free_bytes);
        self
    }
}

impl SpaceProbe for StaticSpaceProbe {
    fn free_space(&self, path: &Path) -> Option<u64> {
        longest_mount(path, self.entries.iter().map(|(mount, free)| (mount.as_path(), *free)))
    }
}

fn longest_mount<'a, I>(path: &Path, mounts: I) -> Option<u64>
where
    I: Iterator<Item = (&'a Path, u64)>,
{
    let mut best: Option<(usize, u64)> = None;
    for (mount, free) in mounts {
        if !path.starts_with(mount) {
            continue;
        }
        let depth = mount.components().count();
        match best {
            Some((best_depth, _)) if best_depth >= depth => {}
            _ => best = Some((depth, free)),
        }
    }
    best.map(|(_, free)| free)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{SpaceProbe, StaticSpaceProbe};

    #[test]
    fn deepest_matching_mount_wins() {
        let probe = StaticSpaceProbe::new()
            .with("/", 10)
            .with("/mnt/media", 500)
            .with("/mnt/media/archive", 20);
        assert_eq!(probe.free_space(Path::new("/mnt/media/tv/Silo")), Some(500));
        assert_eq!(probe.free_space(Path::new("/mnt/media/archive/x")), Some(20));
        assert_eq!(probe.free_space(Path::new("/srv")), Some(10));
        assert_eq!(StaticSpaceProbe::new().free_space(Path::new("/srv")), None);
    }
}
