// Object cache: `<stem>.<arch>.o` next to the source it was compiled from.
//
// Validity is decided by presence and modification time only:
// - no cache file             -> Missing
// - cache but no source       -> Orphaned (release layout: ship the .o alone)
// - cache at least as new     -> Fresh
// - source strictly newer     -> Stale

use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheValidity {
    Missing,
    Fresh,
    Stale,
    Orphaned,
}

impl CacheValidity {
    pub fn is_usable(self) -> bool {
        matches!(self, CacheValidity::Fresh | CacheValidity::Orphaned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCache {
    source: PathBuf,
    object: PathBuf,
}

impl ObjectCache {
    pub fn for_source(source: &Path, arch: &str) -> Self {
        Self {
            source: source.to_path_buf(),
            object: tagged_path(source, arch),
        }
    }

    pub fn object_path(&self) -> &Path {
        &self.object
    }

    pub fn validity(&self) -> CacheValidity {
        let Some(object_time) = modified(&self.object) else {
            return CacheValidity::Missing;
        };
        if !self.source.exists() {
            return CacheValidity::Orphaned;
        }
        match modified(&self.source) {
            Some(source_time) if object_time >= source_time => CacheValidity::Fresh,
            _ => CacheValidity::Stale,
        }
    }
}

/// `dir/foo.c` or `dir/foo.o` -> `dir/foo.<arch>.o`
pub fn tagged_path(path: &Path, arch: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}.o", stem, arch))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
