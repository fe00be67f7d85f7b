//! Per-job working directory allocation.

use carpenter_core::publisher::{AssetPublisher, KEY_SEPARATOR, path_segment};
use carpenter_core::{JobId, JobSpec};
use std::path::{Path, PathBuf};

/// Directories and files owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    /// Job-exclusive root, removed when the job ends.
    pub root: PathBuf,
    /// Where the build writes publishable files.
    pub publish_dir: PathBuf,
    /// Where the source tarball is downloaded to.
    pub tarball: PathBuf,
}

/// Derives collision-free working directories under a shared root.
#[derive(Debug, Clone)]
pub struct PathAllocator {
    root: PathBuf,
}

impl PathAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate paths for `spec`.
    ///
    /// The layout is `<root>/<canonical key>/<job id>`: the key groups builds
    /// of the same package, the job id keeps two identical specs running at
    /// the same time apart. No I/O happens here.
    pub fn allocate(&self, spec: &JobSpec, id: JobId, keys: &dyn AssetPublisher) -> WorkPaths {
        let mut package = spec.package();
        package.name = path_segment(&spec.name);

        let base = path_segment(&keys.canonical_key(&package).replace(KEY_SEPARATOR, "-"));
        let root = self.root.join(base).join(id.to_string());

        WorkPaths {
            publish_dir: root.join("publish"),
            tarball: root.join(format!("{}-{}.tgz", package.name, spec.version)),
            root,
        }
    }
}
