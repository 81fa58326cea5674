// src/version/mod.rs

//! Version parsing, ordering, and range algebra
//!
//! Versions are ordered tuples of numeric and string components with the
//! original separators retained for exact round-trip. A fixed set of
//! "infinity" tokens (develop, main, ...) always sorts above every numeric
//! version. Git-anchored versions resolve their ordering position lazily
//! through a [`CommitLookup`] collaborator.

mod range;

pub use range::{ClosedOpenRange, VersionList, VersionListEntry};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Tokens that sort above every numeric version, in ascending order.
/// `develop` is the highest version that exists.
pub const INFINITY_TOKENS: &[&str] = &["stable", "trunk", "head", "master", "main", "develop"];

/// Rank reserved for the `typemax` sentinel, above every named token.
const INFINITY_MAX_RANK: usize = usize::MAX;

fn infinity_rank(s: &str) -> Option<usize> {
    INFINITY_TOKENS.iter().position(|t| *t == s)
}

/// One parsed component of a version tuple.
///
/// Ordering: string components sort below numeric components, and infinity
/// tokens sort above both (among themselves by table rank).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Str(String),
    Num(u64),
    Infinity(usize),
}

impl Component {
    fn type_order(&self) -> u8 {
        match self {
            Component::Str(_) => 0,
            Component::Num(_) => 1,
            Component::Infinity(_) => 2,
        }
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Component::Str(a), Component::Str(b)) => a.cmp(b),
            (Component::Num(a), Component::Num(b)) => a.cmp(b),
            (Component::Infinity(a), Component::Infinity(b)) => a.cmp(b),
            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Str(s) => write!(f, "{}", s),
            Component::Num(n) => write!(f, "{}", n),
            Component::Infinity(rank) => {
                if *rank == INFINITY_MAX_RANK {
                    write!(f, "infinity")
                } else {
                    write!(f, "{}", INFINITY_TOKENS[*rank])
                }
            }
        }
    }
}

/// An ordered version: parsed component tuple plus the separators between
/// components, kept so `to_string` reproduces the input exactly.
///
/// Immutable once constructed. Comparison is purely structural on the
/// component tuple; separators never participate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardVersion {
    components: Vec<Component>,
    /// One separator per gap between components; may be empty for
    /// digit/letter run boundaries like `1rc2`.
    separators: Vec<String>,
    /// The exact input text. Numeric components normalize on parse
    /// (`05` becomes 5), so display cannot rebuild from the tuple alone.
    text: String,
}

impl StandardVersion {
    /// Parse a version string.
    ///
    /// Splits on alternating runs of digits and letters, capturing the
    /// `.`, `-`, `_` separators. Any other character is a parse error.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidVersion(
                s.to_string(),
                "empty version string".to_string(),
            ));
        }

        let mut components = Vec::new();
        let mut separators = Vec::new();
        let mut run = String::new();
        let mut run_is_digit = false;

        fn flush(run: &mut String, run_is_digit: bool, components: &mut Vec<Component>) {
            if run.is_empty() {
                return;
            }
            let comp = if run_is_digit {
                match run.parse::<u64>() {
                    Ok(n) => Component::Num(n),
                    Err(_) => Component::Str(run.clone()),
                }
            } else if let Some(rank) = infinity_rank(run) {
                Component::Infinity(rank)
            } else {
                Component::Str(run.clone())
            };
            run.clear();
            components.push(comp);
        }

        for ch in s.chars() {
            match ch {
                '0'..='9' | 'a'..='z' | 'A'..='Z' => {
                    let is_digit = ch.is_ascii_digit();
                    if !run.is_empty() && is_digit != run_is_digit {
                        // Run boundary with no explicit separator
                        flush(&mut run, run_is_digit, &mut components);
                        separators.push(String::new());
                    }
                    run_is_digit = is_digit;
                    run.push(ch);
                }
                '.' | '-' | '_' => {
                    if run.is_empty() {
                        return Err(Error::InvalidVersion(
                            s.to_string(),
                            format!("separator '{}' with no preceding component", ch),
                        ));
                    }
                    flush(&mut run, run_is_digit, &mut components);
                    separators.push(ch.to_string());
                }
                other => {
                    return Err(Error::InvalidVersion(
                        s.to_string(),
                        format!("illegal character '{}'", other),
                    ));
                }
            }
        }

        if run.is_empty() {
            return Err(Error::InvalidVersion(
                s.to_string(),
                "trailing separator".to_string(),
            ));
        }
        flush(&mut run, run_is_digit, &mut components);

        debug_assert_eq!(separators.len(), components.len() - 1);

        Ok(Self {
            components,
            separators,
            text: s.to_string(),
        })
    }

    /// The empty version, which sorts below every other version.
    pub fn typemin() -> Self {
        Self {
            components: Vec::new(),
            separators: Vec::new(),
            text: String::new(),
        }
    }

    /// The infinity sentinel, which sorts above every other version,
    /// including all named infinity tokens.
    pub fn typemax() -> Self {
        Self {
            components: vec![Component::Infinity(INFINITY_MAX_RANK)],
            separators: Vec::new(),
            text: "infinity".to_string(),
        }
    }

    pub fn is_typemin(&self) -> bool {
        self.components.is_empty()
    }

    pub fn is_typemax(&self) -> bool {
        self.components == [Component::Infinity(INFINITY_MAX_RANK)]
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// True if any component is an infinity token (develop, main, ...).
    pub fn is_infinite(&self) -> bool {
        self.components
            .iter()
            .any(|c| matches!(c, Component::Infinity(_)))
    }

    /// The smallest version strictly greater than this one obtainable by
    /// bumping the final component. Used to turn inclusive range syntax
    /// into half-open bounds.
    pub fn next_version(&self) -> Self {
        let mut out = self.clone();
        match out.components.last_mut() {
            None => {
                // typemin: the next version is "0"
                out.components.push(Component::Num(0));
            }
            Some(Component::Num(n)) => *n += 1,
            Some(Component::Str(s)) => {
                let next = next_string(s);
                *s = next;
            }
            Some(Component::Infinity(_)) => {
                // Nothing is above infinity; saturate.
            }
        }
        out.text = render(&out.components, &out.separators);
        out
    }

    /// Inverse of [`next_version`](Self::next_version) where one exists.
    pub fn prev_version(&self) -> Self {
        let mut out = self.clone();
        match out.components.last_mut() {
            None => {}
            Some(Component::Num(0)) => {
                out.components.pop();
                out.separators.pop();
            }
            Some(Component::Num(n)) => *n -= 1,
            Some(Component::Str(s)) => {
                let prev = prev_string(s);
                if prev.is_empty() {
                    out.components.pop();
                    out.separators.pop();
                } else {
                    *s = prev;
                }
            }
            Some(Component::Infinity(_)) => {}
        }
        out.text = render(&out.components, &out.separators);
        out
    }

    /// True when `self` is `other` or a point further down the same
    /// version prefix: `1.2.3` satisfies `1.2`, not the other way around.
    pub fn satisfies_prefix(&self, other: &StandardVersion) -> bool {
        if other.components.len() > self.components.len() {
            return false;
        }
        self.components[..other.components.len()] == other.components[..]
    }
}

/// Canonical text of a component tuple, used when successor algebra
/// synthesizes a version with no source text to preserve.
fn render(components: &[Component], separators: &[String]) -> String {
    let mut out = String::new();
    for (i, comp) in components.iter().enumerate() {
        if i > 0 {
            out.push_str(&separators[i - 1]);
        }
        out.push_str(&comp.to_string());
    }
    out
}

/// Lexicographic successor that never lands on an infinity token.
fn next_string(s: &str) -> String {
    let mut out = format!("{}a", s);
    while infinity_rank(&out).is_some() {
        out.push('a');
    }
    out
}

/// Predecessor that never lands on an infinity token. Inverse of
/// [`next_string`] for strings that function produced.
fn prev_string(s: &str) -> String {
    if s.len() > 1 && s.ends_with('a') {
        return s[..s.len() - 1].to_string();
    }
    if s == "a" {
        return String::new();
    }
    let mut chars: Vec<char> = s.chars().collect();
    let last = chars.len() - 1;
    chars[last] = char::from_u32(chars[last] as u32 - 1).unwrap_or('a');
    let mut out: String = chars.iter().collect();
    out.push('z');
    while infinity_rank(&out).is_some() {
        out.push('z');
    }
    out
}

impl PartialEq for StandardVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for StandardVersion {}

impl std::hash::Hash for StandardVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.components.hash(state);
    }
}

impl Ord for StandardVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for StandardVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StandardVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for StandardVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StandardVersion::parse(s)
    }
}

/// Collaborator that places a commit relative to the known release tags of
/// its repository: the nearest ancestor tag that maps to a known version,
/// and the commit distance from it. `None` means no ancestor tag exists and
/// the distance is counted from the first commit.
pub trait CommitLookup {
    fn get(&self, reference: &str) -> Result<(Option<String>, u64)>;
}

/// A version anchored to a commit hash or symbolic ref.
///
/// If the user pinned an equivalent release (`git.<ref>=1.2.3`) that pin is
/// the ordering position. Otherwise the position is resolved once through a
/// [`CommitLookup`]: the nearest preceding known version gains a trailing
/// `git.<distance>` pair, so a commit always sorts after its base tag and
/// before the next one, and two commits on the same base order by distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitVersion {
    reference: String,
    user_version: Option<StandardVersion>,
    #[serde(skip)]
    resolved: OnceLock<StandardVersion>,
}

impl GitVersion {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            user_version: None,
            resolved: OnceLock::new(),
        }
    }

    pub fn with_user_version(reference: impl Into<String>, version: StandardVersion) -> Self {
        Self {
            reference: reference.into(),
            user_version: Some(version),
            resolved: OnceLock::new(),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn user_version(&self) -> Option<&StandardVersion> {
        self.user_version.as_ref()
    }

    /// The ordering position, if already pinned or resolved.
    pub fn effective(&self) -> Option<&StandardVersion> {
        self.user_version.as_ref().or_else(|| self.resolved.get())
    }

    /// Resolve and memoize the ordering position.
    pub fn ref_version(
        &self,
        package: &str,
        lookup: &dyn CommitLookup,
    ) -> Result<&StandardVersion> {
        if let Some(v) = self.user_version.as_ref() {
            return Ok(v);
        }
        if let Some(v) = self.resolved.get() {
            return Ok(v);
        }
        let (prev, distance) =
            lookup
                .get(&self.reference)
                .map_err(|e| Error::UnresolvableGitRef {
                    reference: self.reference.clone(),
                    package: package.to_string(),
                    reason: e.to_string(),
                })?;
        let synthetic = match prev {
            Some(prev_str) => {
                let base = StandardVersion::parse(&prev_str)?;
                StandardVersion::parse(&format!("{}.git.{}", base, distance))?
            }
            None => StandardVersion::parse(&format!("git.{}", distance))?,
        };
        Ok(self.resolved.get_or_init(|| synthetic))
    }
}

impl PartialEq for GitVersion {
    fn eq(&self, other: &Self) -> bool {
        // Same ref AND same resolved position; an unresolved side only
        // compares equal when both positions are absent.
        self.reference == other.reference && self.effective() == other.effective()
    }
}

impl Eq for GitVersion {}

impl std::hash::Hash for GitVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

impl fmt::Display for GitVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "git.{}", self.reference)?;
        if let Some(v) = &self.user_version {
            write!(f, "={}", v)?;
        }
        Ok(())
    }
}

/// A concrete version: plain or git-anchored.
///
/// A git version is never equal to a plain version, even when the resolved
/// positions coincide; equality stays transitive that way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    Standard(StandardVersion),
    Git(GitVersion),
}

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("git.") {
            if let Some((reference, pinned)) = rest.split_once('=') {
                let v = StandardVersion::parse(pinned)?;
                return Ok(Version::Git(GitVersion::with_user_version(reference, v)));
            }
            return Ok(Version::Git(GitVersion::new(rest)));
        }
        // A full commit hash is accepted without the git. prefix
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Version::Git(GitVersion::new(s)));
        }
        Ok(Version::Standard(StandardVersion::parse(s)?))
    }

    /// The position used for ordering. Git versions fall back to their ref
    /// text until resolved, which keeps the order total and deterministic.
    fn order_key(&self) -> (Option<&StandardVersion>, &str) {
        match self {
            Version::Standard(v) => (Some(v), ""),
            Version::Git(g) => (g.effective(), g.reference()),
        }
    }

    pub fn as_standard(&self) -> Option<&StandardVersion> {
        match self {
            Version::Standard(v) => Some(v),
            Version::Git(_) => None,
        }
    }

    /// The ordering position: the version itself, or a git version's
    /// pinned/resolved position.
    pub fn position(&self) -> Option<&StandardVersion> {
        match self {
            Version::Standard(v) => Some(v),
            Version::Git(g) => g.effective(),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.order_key(), other.order_key()) {
            ((Some(a), ra), (Some(b), rb)) => a.cmp(b).then_with(|| ra.cmp(rb)),
            ((Some(_), _), (None, _)) => Ordering::Greater,
            ((None, _), (Some(_), _)) => Ordering::Less,
            ((None, ra), (None, rb)) => ra.cmp(rb),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Standard(v) => write!(f, "{}", v),
            Version::Git(g) => write!(f, "{}", g),
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl From<StandardVersion> for Version {
    fn from(v: StandardVersion) -> Self {
        Version::Standard(v)
    }
}
