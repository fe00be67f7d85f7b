//! Job requests and validated job specifications.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A build request as delivered by the job source.
///
/// Every field is optional on the wire so that validation can say exactly
/// what is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promote: Option<bool>,
}

impl JobRequest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            env: Some(env.into()),
            ..Default::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_type(mut self, build_type: impl Into<String>) -> Self {
        self.build_type = Some(build_type.into());
        self
    }

    pub fn with_promote(mut self, promote: bool) -> Self {
        self.promote = Some(promote);
        self
    }

    /// The build type as it will be reported, falling back to the default kind.
    pub fn build_type_or_default(&self) -> String {
        self.build_type
            .clone()
            .unwrap_or_else(|| BuildKind::default().to_string())
    }

    /// Validate the request into an immutable [`JobSpec`].
    pub fn validate(&self) -> Result<JobSpec> {
        let name = non_empty(&self.name)
            .ok_or_else(|| Error::Validation("name not specified".to_string()))?;
        let env = non_empty(&self.env)
            .ok_or_else(|| Error::Validation("env not specified".to_string()))?;
        let version = self
            .version
            .as_deref()
            .and_then(|v| Version::parse(v.trim()).ok())
            .ok_or_else(|| Error::Validation("Invalid version specified".to_string()))?;
        let build_kind = match &self.build_type {
            Some(t) => t.parse()?,
            None => BuildKind::default(),
        };

        Ok(JobSpec {
            name,
            version,
            env,
            locale: non_empty(&self.locale),
            build_kind,
            promote: self.promote.unwrap_or(true),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Kind of build the executor should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    #[default]
    Webpack,
    Browserify,
    Es6,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::Webpack => "webpack",
            BuildKind::Browserify => "browserify",
            BuildKind::Es6 => "es6",
        }
    }
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "webpack" => Ok(BuildKind::Webpack),
            "browserify" => Ok(BuildKind::Browserify),
            "es6" => Ok(BuildKind::Es6),
            other => Err(Error::Validation(format!("unknown build type: {}", other))),
        }
    }
}

/// A validated build request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub version: Version,
    pub env: String,
    pub locale: Option<String>,
    pub build_kind: BuildKind,
    /// Whether a successful publish should move the head. Transient: it is
    /// not part of [`PackageSpec`].
    pub promote: bool,
}

impl JobSpec {
    /// The package this job builds, without transient job options.
    pub fn package(&self) -> PackageSpec {
        PackageSpec {
            name: self.name.clone(),
            version: self.version.clone(),
            env: self.env.clone(),
            locale: self.locale.clone(),
            build_kind: self.build_kind,
        }
    }
}

/// Package identity handed to fetch, build and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    pub name: String,
    pub version: Version,
    pub env: String,
    pub locale: Option<String>,
    pub build_kind: BuildKind,
}
