//! Version gate: decides whether a job needs to build at all.

use carpenter_core::JobSpec;
use carpenter_core::head::HeadStore;
use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a job was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The requested version is already the head.
    EqualVersions,
    /// The requested version precedes the head.
    OldVersion,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EqualVersions => f.write_str("equal versions"),
            SkipReason::OldVersion => f.write_str("old version"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip(SkipReason),
}

/// Compares a job's version with the last published head.
#[derive(Clone)]
pub struct VersionGate {
    heads: Arc<dyn HeadStore>,
}

impl VersionGate {
    pub fn new(heads: Arc<dyn HeadStore>) -> Self {
        Self { heads }
    }

    /// Decide whether `spec` should be built.
    ///
    /// Lookup failures never block a build.
    pub async fn check(&self, spec: &JobSpec) -> Decision {
        let started = Instant::now();
        let head = self.heads.find_head(&spec.name, &spec.env).await;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Head lookup complete"
        );

        match head {
            Ok(Some(head)) => compare(&spec.version, &head.version),
            Ok(None) => Decision::Proceed,
            Err(e) => {
                warn!(error = %e, "Head lookup failed, building anyway");
                Decision::Proceed
            }
        }
    }
}

fn compare(requested: &Version, head: &str) -> Decision {
    let head = head.trim();
    let Ok(head_version) = Version::parse(head) else {
        // Unordered heads only block exact repeats.
        if requested.to_string() == head {
            return Decision::Skip(SkipReason::EqualVersions);
        }
        warn!(head, "Head version is not valid semver, building anyway");
        return Decision::Proceed;
    };

    if *requested == head_version {
        return Decision::Skip(SkipReason::EqualVersions);
    }
    match requested.cmp_precedence(&head_version) {
        Ordering::Less => Decision::Skip(SkipReason::OldVersion),
        _ => Decision::Proceed,
    }
}
