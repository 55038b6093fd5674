//! Source-type registry.
//!
//! [`SourceKind`] is parsed once at the edge (CLI or caller) and resolved
//! to a boxed [`DocumentProvider`]. Nothing downstream inspects the
//! concrete provider type.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use index_harness_core::provider::{DocumentProvider, HistoryProvider};

use crate::config::Config;
use crate::connector_fs::FilesystemProvider;
use crate::connector_git::GitProvider;
use crate::history::GitHistoryProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Git,
    Filesystem,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git" => Ok(SourceKind::Git),
            "filesystem" | "fs" => Ok(SourceKind::Filesystem),
            other => bail!("Unknown source type: '{}'. Available: git, filesystem", other),
        }
    }
}

/// Build the document provider for `kind`.
pub fn provider_for(kind: SourceKind, config: &Config) -> Result<Box<dyn DocumentProvider>> {
    Ok(match kind {
        SourceKind::Git => Box::new(GitProvider::new(config)?),
        SourceKind::Filesystem => Box::new(FilesystemProvider::new(config)?),
    })
}

/// Edit history is only available for git sources.
pub fn history_for(kind: SourceKind) -> Option<Box<dyn HistoryProvider>> {
    match kind {
        SourceKind::Git => Some(Box::new(GitHistoryProvider)),
        SourceKind::Filesystem => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("git".parse::<SourceKind>().unwrap(), SourceKind::Git);
        assert_eq!("fs".parse::<SourceKind>().unwrap(), SourceKind::Filesystem);
        assert!("s3".parse::<SourceKind>().is_err());
        assert_eq!(SourceKind::Filesystem.to_string(), "filesystem");
    }
}
