//! Build head records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// The last version published for a `{name, env}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHead {
    pub name: String,
    pub env: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BuildHead {
    pub fn new(name: impl Into<String>, env: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
            version: version.into(),
            updated_at: None,
        }
    }
}

/// Read access to head records.
#[async_trait]
pub trait HeadStore: Send + Sync {
    async fn find_head(&self, name: &str, env: &str) -> Result<Option<BuildHead>>;
}
