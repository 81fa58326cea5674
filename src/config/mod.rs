// src/config/mod.rs

//! Concretizer configuration
//!
//! User- and site-level preferences the solver folds into its optimization
//! criteria: preferred version order per package, preferred variant
//! values, external installations that can stand in for a build, declared
//! compilers, and the default platform triple. One document, loaded once,
//! passed explicitly to solver setup.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn default_true() -> bool {
    true
}

/// An externally installed package selectable instead of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDecl {
    /// The concrete spec this installation realizes, e.g. `zlib@=1.2.13+shared`
    pub spec: String,
    /// Install prefix on disk
    pub prefix: String,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub extra_attributes: BTreeMap<String, String>,
}

/// Per-package preferences.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackagePrefs {
    /// Version strings in preference order; earlier wins
    #[serde(default)]
    pub version: Vec<String>,
    /// Preferred value per variant name
    #[serde(default)]
    pub variants: BTreeMap<String, String>,
    #[serde(default)]
    pub externals: Vec<ExternalDecl>,
    /// False forbids building from source, leaving only externals
    #[serde(default = "default_true")]
    pub buildable: bool,
}

/// A compiler installation the solver may assign.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompilerDecl {
    pub name: String,
    pub version: String,
    /// Default flag sets by flag name (cflags, cxxflags, ldflags, ...)
    #[serde(default)]
    pub flags: BTreeMap<String, Vec<String>>,
    /// Targets this compiler's optimization-flag table recognizes; empty
    /// means every target
    #[serde(default)]
    pub supported_targets: Vec<String>,
}

impl CompilerDecl {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flag_name: &str, flags: &[&str]) -> Self {
        self.flags.insert(
            flag_name.to_string(),
            flags.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.supported_targets = targets.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Display form `name@version`.
    pub fn label(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// The platform triple concretization fills in when a request leaves
/// architecture parts open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchDefaults {
    pub platform: String,
    pub os: String,
    pub target: String,
}

impl Default for ArchDefaults {
    fn default() -> Self {
        Self {
            platform: "linux".to_string(),
            os: "unknown".to_string(),
            target: std::env::consts::ARCH.to_string(),
        }
    }
}

/// The whole concretizer configuration document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConcretizerConfig {
    #[serde(default)]
    pub packages: BTreeMap<String, PackagePrefs>,
    #[serde(default)]
    pub compilers: Vec<CompilerDecl>,
    #[serde(default)]
    pub arch: ArchDefaults,
}

impl ConcretizerConfig {
    /// Load from a YAML document on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
            .map_err(|e| Error::Config(format!("in {}: {}", path.display(), e)))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn prefs_for(&self, package: &str) -> Option<&PackagePrefs> {
        self.packages.get(package)
    }

    /// All configured externals for a package, in declaration order
    /// (earlier entries are preferred).
    pub fn externals_for(&self, package: &str) -> &[ExternalDecl] {
        self.prefs_for(package)
            .map(|p| p.externals.as_slice())
            .unwrap_or_default()
    }

    pub fn is_buildable(&self, package: &str) -> bool {
        self.prefs_for(package).map_or(true, |p| p.buildable)
    }
}
