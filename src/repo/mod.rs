// src/repo/mod.rs

//! Package metadata: the knowledge base the concretizer reads
//!
//! A [`PackageRepository`] answers what the solver needs to know about a
//! package: its declared versions, variant declarations, conditional
//! dependencies, conflicts, and what virtual interfaces it provides.
//! [`MemoryRepository`] is the in-memory implementation used by embedders
//! and tests; package definitions are assembled builder-style.

use crate::error::{Error, Result};
use crate::spec::{DepTypes, SpecNode};
use crate::variant::VariantDef;
use crate::version::Version;
use std::collections::BTreeMap;

/// One declared version of a package.
#[derive(Debug, Clone)]
pub struct DeclaredVersion {
    pub version: Version,
    /// Marked preferred in the package declaration; outranks newer
    /// versions when defaults are chosen.
    pub preferred: bool,
}

/// A conditional `depends_on` declaration.
///
/// `when` is the trigger: the dependency exists only for dependents
/// satisfying it. `constraint` is what the edge imposes on the dependency
/// (its name may be a virtual interface).
#[derive(Debug, Clone)]
pub struct DependencyCondition {
    pub constraint: SpecNode,
    pub when: Option<SpecNode>,
    pub types: DepTypes,
}

impl DependencyCondition {
    pub fn dependency_name(&self) -> &str {
        &self.constraint.name
    }
}

/// A `conflicts` declaration: `constraint` and `when` cannot hold at once.
#[derive(Debug, Clone)]
pub struct ConflictDecl {
    pub constraint: SpecNode,
    pub when: Option<SpecNode>,
    pub message: Option<String>,
}

/// A `provides` declaration: this package satisfies `virtual_name`, under
/// an optional condition on the provider itself.
#[derive(Debug, Clone)]
pub struct ProvideDecl {
    pub virtual_name: String,
    pub when: Option<SpecNode>,
}

/// Everything the concretizer knows about one package.
#[derive(Debug, Clone, Default)]
pub struct PackageDef {
    pub name: String,
    pub versions: Vec<DeclaredVersion>,
    pub variants: Vec<VariantDef>,
    pub dependencies: Vec<DependencyCondition>,
    pub conflicts: Vec<ConflictDecl>,
    pub provides: Vec<ProvideDecl>,
}

impl PackageDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.versions.push(DeclaredVersion {
            version: Version::parse(version).expect("declared version parses"),
            preferred: false,
        });
        self
    }

    pub fn with_preferred_version(mut self, version: &str) -> Self {
        self.versions.push(DeclaredVersion {
            version: Version::parse(version).expect("declared version parses"),
            preferred: true,
        });
        self
    }

    pub fn with_variant(mut self, variant: VariantDef) -> Self {
        self.variants.push(variant);
        self
    }

    /// Unconditional dependency with default build+link types.
    pub fn depends_on(self, constraint: &str) -> Self {
        self.depends_on_when(constraint, None, DepTypes::default_types())
    }

    pub fn depends_on_typed(self, constraint: &str, types: DepTypes) -> Self {
        self.depends_on_when(constraint, None, types)
    }

    pub fn depends_on_when(
        mut self,
        constraint: &str,
        when: Option<&str>,
        types: DepTypes,
    ) -> Self {
        let constraint = SpecNode::parse(constraint).expect("dependency constraint parses");
        let when = when.map(|w| SpecNode::parse(w).expect("when condition parses"));
        self.dependencies.push(DependencyCondition {
            constraint,
            when,
            types,
        });
        self
    }

    pub fn conflicts_with(mut self, constraint: &str, when: Option<&str>) -> Self {
        let constraint = SpecNode::parse(constraint).expect("conflict constraint parses");
        let when = when.map(|w| SpecNode::parse(w).expect("when condition parses"));
        self.conflicts.push(ConflictDecl {
            constraint,
            when,
            message: None,
        });
        self
    }

    pub fn provides(mut self, virtual_name: &str) -> Self {
        self.provides.push(ProvideDecl {
            virtual_name: virtual_name.to_string(),
            when: None,
        });
        self
    }

    pub fn provides_when(mut self, virtual_name: &str, when: &str) -> Self {
        self.provides.push(ProvideDecl {
            virtual_name: virtual_name.to_string(),
            when: Some(SpecNode::parse(when).expect("when condition parses")),
        });
        self
    }

    pub fn variant_def(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }
}

/// Read access to package metadata.
pub trait PackageRepository {
    /// The package definition, if the name is a real package.
    fn get(&self, name: &str) -> Option<&PackageDef>;

    /// Ordered provider names for a virtual interface. Empty when the
    /// name is not virtual.
    fn providers_of(&self, virtual_name: &str) -> Vec<String>;

    /// True when the name is a known virtual interface.
    fn is_virtual(&self, name: &str) -> bool {
        !self.providers_of(name).is_empty()
    }

    /// The definition, or the eager repository-integrity error the solver
    /// setup relies on.
    fn get_or_error(&self, name: &str, required_by: &str) -> Result<&PackageDef> {
        self.get(name).ok_or_else(|| Error::PackageNotFound {
            name: name.to_string(),
            required_by: required_by.to_string(),
        })
    }
}

/// In-memory repository backed by a name-ordered map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    packages: BTreeMap<String, PackageDef>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, package: PackageDef) {
        self.packages.insert(package.name.clone(), package);
    }

    pub fn with(mut self, package: PackageDef) -> Self {
        self.add(package);
        self
    }

    pub fn package_names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }
}

impl PackageRepository for MemoryRepository {
    fn get(&self, name: &str) -> Option<&PackageDef> {
        self.packages.get(name)
    }

    fn providers_of(&self, virtual_name: &str) -> Vec<String> {
        // Name order keeps provider numbering stable across runs
        self.packages
            .values()
            .filter(|p| p.provides.iter().any(|d| d.virtual_name == virtual_name))
            .map(|p| p.name.clone())
            .collect()
    }
}
