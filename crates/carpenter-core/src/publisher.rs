//! Asset publishing abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::executor::BuildOutput;
use crate::{PackageSpec, Result};

/// Separator used in canonical keys. Reserved: it never appears in a
/// filesystem path derived from a key.
pub const KEY_SEPARATOR: char = '!';

/// Turn a name into a single path segment.
///
/// Separators become `-` and names that would resolve to the parent or
/// current directory get a `_` prefix.
pub fn path_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '-',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// What to publish alongside the package identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Move the head to this version after publishing.
    pub promote: bool,
    #[serde(flatten)]
    pub output: BuildOutput,
}

/// Trait for asset publishers.
#[async_trait]
pub trait AssetPublisher: Send + Sync {
    /// Publish built assets for `package`.
    async fn publish(&self, package: &PackageSpec, options: PublishOptions) -> Result<()>;

    /// Deterministic key identifying a package build.
    fn canonical_key(&self, package: &PackageSpec) -> String {
        let mut parts = vec![
            package.name.clone(),
            package.env.clone(),
            package.version.to_string(),
        ];
        if let Some(locale) = &package.locale {
            parts.push(locale.clone());
        }
        parts.join(&KEY_SEPARATOR.to_string())
    }
}
