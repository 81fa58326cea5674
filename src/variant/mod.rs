// src/variant/mod.rs

//! Variant values, declarations, and maps
//!
//! Variants are build-time options attached to a spec: boolean switches
//! (`+shared` / `~shared`), single-valued settings (`build_type=Release`)
//! and multi-valued sets (`languages=c,cxx`). A package declares each
//! variant's default and allowed domain; a spec carries chosen values.
//! Canonical storage is sorted, so display and hashing are deterministic.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A set-valued variant: sorted, deduplicated values, comma-joined form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiValuedVariant {
    name: String,
    values: Vec<String>,
}

impl MultiValuedVariant {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        let mut values: Vec<String> = values.into_iter().collect();
        values.sort();
        values.dedup();
        Self {
            name: name.into(),
            values,
        }
    }

    /// Parse the comma-separated external form.
    pub fn parse(name: &str, raw: &str) -> Self {
        Self::new(name, raw.split(',').map(|s| s.trim().to_string()))
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.binary_search_by(|v| v.as_str().cmp(value)).is_ok()
    }
}

/// A variant holding exactly one value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SingleValuedVariant {
    name: String,
    value: String,
}

impl SingleValuedVariant {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parse the external form, rejecting comma-separated multiples.
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        let values: Vec<&str> = raw.split(',').map(str::trim).collect();
        if values.len() != 1 {
            return Err(Error::MultipleValuesInExclusiveVariant {
                variant: name.to_string(),
                values: values.iter().map(|s| s.to_string()).collect(),
            });
        }
        Ok(Self::new(name, values[0]))
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// A strictly true/false variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoolValuedVariant {
    name: String,
    value: bool,
}

impl BoolValuedVariant {
    pub fn new(name: impl Into<String>, value: bool) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Parse "true"/"false", case-insensitively. Anything else is an error.
    pub fn parse(name: &str, raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Self::new(name, true)),
            "false" => Ok(Self::new(name, false)),
            _ => Err(Error::Parse(format!(
                "boolean variant '{}' must be true or false, got '{}'",
                name, raw
            ))),
        }
    }

    pub fn value(&self) -> bool {
        self.value
    }
}

/// A variant value of any of the three kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantSpec {
    Multi(MultiValuedVariant),
    Single(SingleValuedVariant),
    Bool(BoolValuedVariant),
}

impl VariantSpec {
    pub fn name(&self) -> &str {
        match self {
            VariantSpec::Multi(v) => &v.name,
            VariantSpec::Single(v) => &v.name,
            VariantSpec::Bool(v) => &v.name,
        }
    }

    /// All values in canonical textual form.
    pub fn value_strings(&self) -> Vec<String> {
        match self {
            VariantSpec::Multi(v) => v.values.clone(),
            VariantSpec::Single(v) => vec![v.value.clone()],
            VariantSpec::Bool(v) => vec![v.value.to_string()],
        }
    }

    /// Does this value satisfy `constraint`? Multi-valued: superset of the
    /// constraint's values. Single/bool: equality. Names must match.
    pub fn satisfies(&self, constraint: &VariantSpec) -> bool {
        if self.name() != constraint.name() {
            return false;
        }
        match (self, constraint) {
            (VariantSpec::Multi(mine), VariantSpec::Multi(theirs)) => {
                theirs.values.iter().all(|v| mine.contains(v))
            }
            (VariantSpec::Single(mine), VariantSpec::Single(theirs)) => {
                mine.value == theirs.value
            }
            (VariantSpec::Bool(mine), VariantSpec::Bool(theirs)) => mine.value == theirs.value,
            _ => false,
        }
    }

    /// Can both values hold at once? Multi-valued variants always coexist
    /// (their union is a valid value); single/bool only when equal.
    pub fn compatible(&self, other: &VariantSpec) -> bool {
        if self.name() != other.name() {
            return false;
        }
        match (self, other) {
            (VariantSpec::Multi(_), VariantSpec::Multi(_)) => true,
            _ => self == other,
        }
    }

    /// Merge `other` into `self`. Multi-valued variants take the union;
    /// single/bool values must already agree. Returns whether `self`
    /// changed.
    pub fn constrain(&mut self, other: &VariantSpec) -> Result<bool> {
        if !self.compatible(other) {
            return Err(Error::UnsatisfiableVariantSpec {
                variant: self.name().to_string(),
                lhs: self.to_string(),
                rhs: other.to_string(),
            });
        }
        match (self, other) {
            (VariantSpec::Multi(mine), VariantSpec::Multi(theirs)) => {
                let mut changed = false;
                for v in &theirs.values {
                    if !mine.values.contains(v) {
                        mine.values.push(v.clone());
                        changed = true;
                    }
                }
                if changed {
                    mine.values.sort();
                }
                Ok(changed)
            }
            _ => Ok(false),
        }
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantSpec::Multi(v) => write!(f, "{}={}", v.name, v.values.join(",")),
            VariantSpec::Single(v) => write!(f, "{}={}", v.name, v.value),
            VariantSpec::Bool(v) => {
                write!(f, "{}{}", if v.value { '+' } else { '~' }, v.name)
            }
        }
    }
}

/// Group-level check across all of a variant's values at once, for rules
/// like mutual exclusion inside a value family.
pub type GroupValidator = Arc<dyn Fn(&[String]) -> Result<()> + Send + Sync>;

/// The allowed-value domain of a declared variant.
#[derive(Clone)]
pub enum VariantDomain {
    /// Exactly true/false
    Bool,
    /// A fixed, enumerable value set
    Enumerated(Vec<String>),
    /// Open domain checked by a predicate
    Open(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for VariantDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantDomain::Bool => write!(f, "Bool"),
            VariantDomain::Enumerated(vs) => write!(f, "Enumerated({:?})", vs),
            VariantDomain::Open(_) => write!(f, "Open(..)"),
        }
    }
}

impl VariantDomain {
    fn describe(&self) -> String {
        match self {
            VariantDomain::Bool => "true, false".to_string(),
            VariantDomain::Enumerated(vs) => vs.join(", "),
            VariantDomain::Open(_) => "<validator>".to_string(),
        }
    }

    fn allows(&self, value: &str) -> bool {
        match self {
            VariantDomain::Bool => {
                matches!(value.to_ascii_lowercase().as_str(), "true" | "false")
            }
            VariantDomain::Enumerated(vs) => vs.iter().any(|v| v == value),
            VariantDomain::Open(pred) => pred(value),
        }
    }
}

/// A package-level variant declaration: name, default, domain, and
/// multiplicity.
#[derive(Clone)]
pub struct VariantDef {
    pub name: String,
    pub default: String,
    pub multi: bool,
    pub domain: VariantDomain,
    pub group_validator: Option<GroupValidator>,
    pub description: String,
}

impl fmt::Debug for VariantDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariantDef")
            .field("name", &self.name)
            .field("default", &self.default)
            .field("multi", &self.multi)
            .field("domain", &self.domain)
            .field(
                "group_validator",
                &self.group_validator.as_ref().map(|_| "<validator>"),
            )
            .field("description", &self.description)
            .finish()
    }
}

impl VariantDef {
    pub fn bool(name: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            default: default.to_string(),
            multi: false,
            domain: VariantDomain::Bool,
            group_validator: None,
            description: String::new(),
        }
    }

    pub fn single(
        name: impl Into<String>,
        default: impl Into<String>,
        values: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            multi: false,
            domain: VariantDomain::Enumerated(values.into_iter().collect()),
            group_validator: None,
            description: String::new(),
        }
    }

    pub fn multi(
        name: impl Into<String>,
        default: impl Into<String>,
        values: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            multi: true,
            domain: VariantDomain::Enumerated(values.into_iter().collect()),
            group_validator: None,
            description: String::new(),
        }
    }

    pub fn open(
        name: impl Into<String>,
        default: impl Into<String>,
        multi: bool,
        validator: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    ) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            multi,
            domain: VariantDomain::Open(validator),
            group_validator: None,
            description: String::new(),
        }
    }

    pub fn with_group_validator(mut self, validator: GroupValidator) -> Self {
        self.group_validator = Some(validator);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.domain, VariantDomain::Bool)
    }

    /// The enumerable value domain, when there is one.
    pub fn enumerated_values(&self) -> Option<Vec<String>> {
        match &self.domain {
            VariantDomain::Bool => Some(vec!["true".to_string(), "false".to_string()]),
            VariantDomain::Enumerated(vs) => Some(vs.clone()),
            VariantDomain::Open(_) => None,
        }
    }

    /// Construct the correctly-typed value for this declaration.
    pub fn make_variant(&self, raw: &str) -> Result<VariantSpec> {
        let spec = if self.is_bool() {
            VariantSpec::Bool(BoolValuedVariant::parse(&self.name, raw)?)
        } else if self.multi {
            VariantSpec::Multi(MultiValuedVariant::parse(&self.name, raw))
        } else {
            VariantSpec::Single(SingleValuedVariant::parse(&self.name, raw)?)
        };
        Ok(spec)
    }

    /// The declaration's default, as a typed value.
    pub fn make_default(&self) -> Result<VariantSpec> {
        self.make_variant(&self.default)
    }

    /// Check a value against this declaration: name match, multiplicity,
    /// every value inside the domain (all offenders reported at once), and
    /// any group-level rule.
    pub fn validate_or_raise(&self, vspec: &VariantSpec, package: &str) -> Result<()> {
        if vspec.name() != self.name {
            return Err(Error::InconsistentValidation {
                asked: vspec.name().to_string(),
                definition: self.name.clone(),
            });
        }

        let values = vspec.value_strings();
        if !self.multi && values.len() > 1 {
            return Err(Error::MultipleValuesInExclusiveVariant {
                variant: self.name.clone(),
                values,
            });
        }

        let offending: Vec<String> = values
            .iter()
            .filter(|v| !self.domain.allows(v))
            .cloned()
            .collect();
        if !offending.is_empty() {
            return Err(Error::InvalidVariantValue {
                variant: self.name.clone(),
                package: package.to_string(),
                values: offending,
                allowed: self.domain.describe(),
            });
        }

        if let Some(check) = &self.group_validator {
            check(&values)?;
        }
        Ok(())
    }
}

/// The variant values attached to one spec, keyed by variant name.
///
/// Plain insertion refuses to overwrite; `substitute` is the explicit
/// overwrite path. Iteration order is always name order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariantMap {
    variants: BTreeMap<String, VariantSpec>,
}

impl VariantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn get(&self, name: &str) -> Option<&VariantSpec> {
        self.variants.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variants.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariantSpec)> {
        self.variants.iter()
    }

    /// Insert a new variant. Fails if the name is already present.
    pub fn insert(&mut self, vspec: VariantSpec) -> Result<()> {
        let name = vspec.name().to_string();
        if self.variants.contains_key(&name) {
            return Err(Error::DuplicateVariant(name));
        }
        self.variants.insert(name, vspec);
        Ok(())
    }

    /// Overwrite (or insert) a variant. The only sanctioned overwrite path.
    pub fn substitute(&mut self, vspec: VariantSpec) {
        self.variants.insert(vspec.name().to_string(), vspec);
    }

    /// Key-wise satisfaction: every constraint key must be present here
    /// with a satisfying value.
    pub fn satisfies(&self, constraints: &VariantMap) -> bool {
        constraints.variants.iter().all(|(name, theirs)| {
            self.variants
                .get(name)
                .is_some_and(|mine| mine.satisfies(theirs))
        })
    }

    /// Key-wise merge. New keys are inserted; existing keys are
    /// constrained in place. Returns whether anything changed.
    pub fn constrain(&mut self, other: &VariantMap) -> Result<bool> {
        let mut changed = false;
        for (name, theirs) in &other.variants {
            match self.variants.get_mut(name) {
                Some(mine) => changed |= mine.constrain(theirs)?,
                None => {
                    self.variants.insert(name.clone(), theirs.clone());
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Completeness check for concrete specs: every declared variant must
    /// have a value.
    pub fn is_complete_for(&self, declarations: &[VariantDef]) -> bool {
        declarations.iter().all(|d| self.contains(&d.name))
    }
}

impl fmt::Display for VariantMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bool switches come first, concatenated; valued variants follow,
        // space-separated
        for vs in self.variants.values() {
            if matches!(vs, VariantSpec::Bool(_)) {
                write!(f, "{}", vs)?;
            }
        }
        for vs in self.variants.values() {
            if !matches!(vs, VariantSpec::Bool(_)) {
                write!(f, " {}", vs)?;
            }
        }
        Ok(())
    }
}
