//! Policy files
//!
//! A boundary can be described in TOML instead of through
//! [`IsolationPolicy::builder`]:
//!
//! ```toml
//! [policy]
//! include = ["pkg.isolated"]
//! exclude = ["pkg.isolated.internal"]
//! discover = true
//! ignore = ["meta"]
//! share-ambient = false
//!
//! [[archive]]
//! path = "lib/isolated.zip"
//! kind = "zip"
//!
//! [host]
//! archives = ["lib/host"]
//!
//! [context.input]
//! browser = "firefox"
//! ```
//!
//! Relative paths are resolved against the directory of the file.

use crate::ambient::{AmbientScope, AmbientStore};
use crate::archive::{Archive, ArchiveError};
use crate::policy::IsolationPolicy;
use crate::resolver::HostLoader;
use enclave_sdk::{ContextMap, ContextSnapshot, EntryRegistry, ProtocolError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while loading a policy file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the policy file
    #[error("Failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse policy file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file parsed but describes an unusable policy
    #[error("Invalid policy: {0}")]
    Invalid(String),
}

/// Parsed policy file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Routing rules
    #[serde(default)]
    pub policy: PolicySection,

    /// Isolated archives, in precedence order
    #[serde(default, rename = "archive")]
    pub archives: Vec<ArchiveEntry>,

    /// Archives visible to the host loader
    #[serde(default)]
    pub host: HostSection,

    /// Initial ambient context
    #[serde(default)]
    pub context: ContextSection,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// `[policy]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolicySection {
    /// Included prefixes
    #[serde(default)]
    pub include: Vec<String>,

    /// Excluded prefixes
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Include every package found in the isolated archives
    #[serde(default)]
    pub discover: bool,

    /// Prefixes skipped during discovery
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Reuse the host's ambient store
    #[serde(default)]
    pub share_ambient: bool,
}

/// Kind of an `[[archive]]` entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// Zip container
    Zip,
    /// Directory tree
    Dir,
}

/// `[[archive]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArchiveEntry {
    /// Archive path
    pub path: PathBuf,

    /// Archive kind (inferred from the file system when omitted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArchiveKind>,
}

/// `[host]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    /// Host archive paths
    #[serde(default)]
    pub archives: Vec<PathBuf>,
}

/// `[context]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContextSection {
    /// Input parameters
    #[serde(default)]
    pub input: ContextMap,

    /// Environment
    #[serde(default)]
    pub env: ContextMap,
}

impl PolicyConfig {
    /// Load a policy file, resolving relative paths against its directory
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse a policy from TOML text (relative paths stay relative)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PolicyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check prefixes and paths
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefixes = self
            .policy
            .include
            .iter()
            .chain(&self.policy.exclude)
            .chain(&self.policy.ignore);
        for prefix in prefixes {
            if prefix.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "empty prefix would match every symbol".to_string(),
                ));
            }
        }

        let paths = self
            .archives
            .iter()
            .map(|entry| &entry.path)
            .chain(&self.host.archives);
        for path in paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("empty archive path".to_string()));
            }
        }
        Ok(())
    }

    /// Directory relative paths are resolved against
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Isolated archives, in precedence order
    pub fn isolated_archives(&self) -> Vec<Archive> {
        self.archives
            .iter()
            .map(|entry| {
                let path = self.resolve_path(&entry.path);
                match entry.kind {
                    Some(ArchiveKind::Zip) => Archive::zip(path),
                    Some(ArchiveKind::Dir) => Archive::directory(path),
                    None => Archive::from_path(path),
                }
            })
            .collect()
    }

    /// Host archives, in precedence order
    pub fn host_archives(&self) -> Vec<Archive> {
        self.host
            .archives
            .iter()
            .map(|path| Archive::from_path(self.resolve_path(path)))
            .collect()
    }

    /// Build the isolation policy described by this file
    pub fn into_policy(self) -> IsolationPolicy {
        let mut builder = IsolationPolicy::builder()
            .archives(self.isolated_archives())
            .discover(self.policy.discover)
            .share_ambient(self.policy.share_ambient);
        for prefix in self.policy.include {
            builder = builder.include(prefix);
        }
        for prefix in self.policy.exclude {
            builder = builder.exclude(prefix);
        }
        for prefix in self.policy.ignore {
            builder = builder.ignore(prefix);
        }
        builder.build()
    }

    /// Open a host loader over the `[host]` archives
    pub fn host_loader(&self, registry: Arc<EntryRegistry>) -> Result<HostLoader, ArchiveError> {
        HostLoader::new(self.host_archives(), registry)
    }

    /// Initial ambient context from `[context]`
    pub fn context_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot::new(self.context.input.clone(), self.context.env.clone())
    }

    /// Start the `[context]` table as the calling thread's context in `store`
    pub fn enter_context(&self, store: Arc<AmbientStore>) -> Result<AmbientScope, ProtocolError> {
        let snapshot = self.context_snapshot();
        AmbientScope::enter(store, snapshot.input, snapshot.env)
    }
}
