// src/version/range.rs

//! Half-open version ranges and reduced version lists
//!
//! Constraint syntax is inclusive (`1.0:2.0`) but ranges are stored
//! half-open: `1.0:2.0` becomes `[1.0, 2.1)`, which is what makes prefix
//! semantics work (`2.0.5` is inside `:2.0`). A [`VersionList`] keeps its
//! elements sorted and reduced: no two neighboring elements intersect.

use crate::error::{Error, Result};
use crate::version::{StandardVersion, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A half-open interval `[lo, hi)` over [`StandardVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosedOpenRange {
    lo: StandardVersion,
    hi: StandardVersion,
}

impl ClosedOpenRange {
    /// Construct from half-open bounds. Fails unless `hi >= lo`.
    pub fn new(lo: StandardVersion, hi: StandardVersion) -> Result<Self> {
        if hi < lo {
            return Err(Error::InvalidVersionRange {
                lo: lo.to_string(),
                hi: hi.to_string(),
            });
        }
        Ok(Self { lo, hi })
    }

    /// Construct from the inclusive `lo:hi` constraint syntax. The upper
    /// bound is bumped past every version prefixed by `hi`.
    pub fn from_inclusive(lo: StandardVersion, hi: StandardVersion) -> Result<Self> {
        let hi_exclusive = hi.next_version();
        if hi < lo {
            return Err(Error::InvalidVersionRange {
                lo: lo.to_string(),
                hi: hi.to_string(),
            });
        }
        Self::new(lo, hi_exclusive)
    }

    /// The range covering every version prefixed by `v`.
    pub fn point(v: StandardVersion) -> Self {
        let hi = v.next_version();
        Self { lo: v, hi }
    }

    /// The unbounded range.
    pub fn any() -> Self {
        Self {
            lo: StandardVersion::typemin(),
            hi: StandardVersion::typemax(),
        }
    }

    pub fn lo(&self) -> &StandardVersion {
        &self.lo
    }

    pub fn hi(&self) -> &StandardVersion {
        &self.hi
    }

    pub fn contains(&self, v: &StandardVersion) -> bool {
        *v >= self.lo && *v < self.hi
    }

    /// A concrete version is inside the range if its ordering position is.
    /// Git versions use their pinned or resolved position; an unresolved
    /// git version is inside nothing.
    pub fn contains_version(&self, v: &Version) -> bool {
        v.position().is_some_and(|p| self.contains(p))
    }

    pub fn intersects(&self, other: &ClosedOpenRange) -> bool {
        self.lo < other.hi && other.lo < self.hi
    }

    /// Subset test: every version in `self` is in `other`.
    pub fn satisfies(&self, other: &ClosedOpenRange) -> bool {
        other.lo <= self.lo && self.hi <= other.hi
    }

    pub fn intersection(&self, other: &ClosedOpenRange) -> Option<ClosedOpenRange> {
        let lo = self.lo.clone().max(other.lo.clone());
        let hi = self.hi.clone().min(other.hi.clone());
        if lo < hi {
            Some(ClosedOpenRange { lo, hi })
        } else {
            None
        }
    }

    /// Merge with an overlapping or exactly adjoining range. `None` when
    /// the union would not be contiguous.
    pub fn union(&self, other: &ClosedOpenRange) -> Option<ClosedOpenRange> {
        if self.lo <= other.hi && other.lo <= self.hi {
            Some(ClosedOpenRange {
                lo: self.lo.clone().min(other.lo.clone()),
                hi: self.hi.clone().max(other.hi.clone()),
            })
        } else {
            None
        }
    }
}

impl Ord for ClosedOpenRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lo
            .cmp(&other.lo)
            .then_with(|| self.hi.cmp(&other.hi))
    }
}

impl PartialOrd for ClosedOpenRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ClosedOpenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let open_lo = self.lo.is_typemin();
        let open_hi = self.hi.is_typemax();
        match (open_lo, open_hi) {
            (true, true) => write!(f, ":"),
            (false, true) => write!(f, "{}:", self.lo),
            (true, false) => write!(f, ":{}", self.hi.prev_version()),
            (false, false) => {
                let hi_inclusive = self.hi.prev_version();
                if hi_inclusive == self.lo {
                    write!(f, "{}", self.lo)
                } else {
                    write!(f, "{}:{}", self.lo, hi_inclusive)
                }
            }
        }
    }
}

impl FromStr for ClosedOpenRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            None => Ok(ClosedOpenRange::point(StandardVersion::parse(s)?)),
            Some(("", "")) => Ok(ClosedOpenRange::any()),
            Some((lo, "")) => ClosedOpenRange::new(
                StandardVersion::parse(lo)?,
                StandardVersion::typemax(),
            ),
            Some(("", hi)) => Ok(ClosedOpenRange {
                lo: StandardVersion::typemin(),
                hi: StandardVersion::parse(hi)?.next_version(),
            }),
            Some((lo, hi)) => ClosedOpenRange::from_inclusive(
                StandardVersion::parse(lo)?,
                StandardVersion::parse(hi)?,
            ),
        }
    }
}

/// One element of a [`VersionList`]: a concrete version or a range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionListEntry {
    Version(Version),
    Range(ClosedOpenRange),
}

impl VersionListEntry {
    /// Sort position: lower bound for ranges, the version itself for
    /// points. Unresolved git versions sort first, by ref, so the order
    /// stays total and deterministic.
    fn sort_key(&self) -> (Option<StandardVersion>, String) {
        match self {
            VersionListEntry::Version(Version::Standard(v)) => {
                (Some(v.clone()), String::new())
            }
            VersionListEntry::Version(Version::Git(g)) => {
                (g.effective().cloned(), g.reference().to_string())
            }
            VersionListEntry::Range(r) => (Some(r.lo.clone()), String::new()),
        }
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        let (la, ra) = self.sort_key();
        let (lb, rb) = other.sort_key();
        match (la, lb) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| ra.cmp(&rb)),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => ra.cmp(&rb),
        }
    }

    /// True if the entry admits this concrete version.
    pub fn contains_version(&self, v: &Version) -> bool {
        match self {
            VersionListEntry::Version(u) => u == v,
            VersionListEntry::Range(r) => match v {
                Version::Standard(sv) => r.contains(sv),
                Version::Git(g) => g.effective().is_some_and(|p| r.contains(p)),
            },
        }
    }

    fn intersects(&self, other: &Self) -> bool {
        match (self, other) {
            (VersionListEntry::Version(a), VersionListEntry::Version(b)) => a == b,
            (VersionListEntry::Version(v), VersionListEntry::Range(r))
            | (VersionListEntry::Range(r), VersionListEntry::Version(v)) => {
                r.contains_version(v)
            }
            (VersionListEntry::Range(a), VersionListEntry::Range(b)) => a.intersects(b),
        }
    }

    /// Subset test against another entry.
    fn satisfies(&self, other: &Self) -> bool {
        match (self, other) {
            (VersionListEntry::Version(a), VersionListEntry::Version(b)) => a == b,
            (VersionListEntry::Version(v), VersionListEntry::Range(r)) => {
                r.contains_version(v)
            }
            (VersionListEntry::Range(_), VersionListEntry::Version(_)) => false,
            (VersionListEntry::Range(a), VersionListEntry::Range(b)) => a.satisfies(b),
        }
    }
}

impl fmt::Display for VersionListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Exact versions carry the = sigil so they reparse as exact
            VersionListEntry::Version(Version::Standard(v)) => write!(f, "={}", v),
            VersionListEntry::Version(Version::Git(g)) => write!(f, "{}", g),
            VersionListEntry::Range(r) => write!(f, "{}", r),
        }
    }
}

/// A sorted, reduced list of versions and ranges.
///
/// Reduced means no two neighboring elements intersect: insertion merges
/// any overlapping or contiguous neighbors, so membership and set
/// operations can bisect. An empty list admits nothing; the usual
/// "anything goes" constraint is a single unbounded range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionList {
    entries: Vec<VersionListEntry>,
}

impl VersionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// The list admitting every version.
    pub fn any() -> Self {
        Self {
            entries: vec![VersionListEntry::Range(ClosedOpenRange::any())],
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = VersionListEntry>) -> Self {
        let mut list = Self::new();
        for e in entries {
            list.add(e);
        }
        list
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[VersionListEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionListEntry> {
        self.entries.iter()
    }

    /// True when the list is the single unbounded range.
    pub fn is_any(&self) -> bool {
        matches!(
            self.entries.as_slice(),
            [VersionListEntry::Range(r)] if r.lo.is_typemin() && r.hi.is_typemax()
        )
    }

    /// The single concrete version, if that is all the list holds.
    pub fn concrete(&self) -> Option<&Version> {
        match self.entries.as_slice() {
            [VersionListEntry::Version(v)] => Some(v),
            _ => None,
        }
    }

    /// Insert an entry, keeping the list sorted and reduced.
    ///
    /// Ranges merge with every range they overlap or exactly adjoin (a
    /// lossless union) and absorb any concrete version they contain.
    /// Concrete versions are absorbed by a containing range, deduplicated
    /// against an equal version, and otherwise kept as distinct points.
    pub fn add(&mut self, entry: VersionListEntry) {
        match entry {
            VersionListEntry::Version(v) => {
                let redundant = self.entries.iter().any(|e| match e {
                    VersionListEntry::Version(u) => *u == v,
                    VersionListEntry::Range(r) => r.contains_version(&v),
                });
                if !redundant {
                    let entry = VersionListEntry::Version(v);
                    let pos = self
                        .entries
                        .partition_point(|e| e.key_cmp(&entry) == Ordering::Less);
                    self.entries.insert(pos, entry);
                }
            }
            VersionListEntry::Range(mut range) => {
                let mut keep = Vec::with_capacity(self.entries.len() + 1);
                for existing in self.entries.drain(..) {
                    match &existing {
                        VersionListEntry::Range(er)
                            if er.lo <= range.hi && range.lo <= er.hi =>
                        {
                            range = ClosedOpenRange {
                                lo: range.lo.min(er.lo.clone()),
                                hi: range.hi.max(er.hi.clone()),
                            };
                        }
                        VersionListEntry::Version(ev)
                            if range.contains_version(ev) => {}
                        _ => keep.push(existing),
                    }
                }
                self.entries = keep;
                let entry = VersionListEntry::Range(range);
                let pos = self
                    .entries
                    .partition_point(|e| e.key_cmp(&entry) == Ordering::Less);
                self.entries.insert(pos, entry);
            }
        }
    }

    /// True if the concrete version is admitted by some element.
    pub fn contains_version(&self, v: &Version) -> bool {
        self.entries.iter().any(|e| e.contains_version(v))
    }

    /// Subset test: every element of `self` fits inside some element of
    /// `other`.
    pub fn satisfies(&self, other: &VersionList) -> bool {
        self.entries
            .iter()
            .all(|mine| other.entries.iter().any(|theirs| mine.satisfies(theirs)))
    }

    pub fn intersects(&self, other: &VersionList) -> bool {
        self.entries
            .iter()
            .any(|mine| other.entries.iter().any(|theirs| mine.intersects(theirs)))
    }

    pub fn union(&self, other: &VersionList) -> VersionList {
        let mut out = self.clone();
        for e in &other.entries {
            out.add(e.clone());
        }
        out
    }

    pub fn intersection(&self, other: &VersionList) -> VersionList {
        let mut out = VersionList::new();
        for mine in &self.entries {
            for theirs in &other.entries {
                match (mine, theirs) {
                    (VersionListEntry::Range(a), VersionListEntry::Range(b)) => {
                        if let Some(r) = a.intersection(b) {
                            out.add(VersionListEntry::Range(r));
                        }
                    }
                    (VersionListEntry::Version(v), _) if theirs.contains_version(v) => {
                        out.add(mine.clone());
                    }
                    (_, VersionListEntry::Version(v)) if mine.contains_version(v) => {
                        out.add(theirs.clone());
                    }
                    _ => {}
                }
            }
        }
        out
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut list = VersionList::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Parse(format!("empty element in version list '{}'", s)));
            }
            list.add(parse_entry(part)?);
        }
        Ok(list)
    }
}

/// One constraint element: `=1.2` exact, `git.<ref>` exact, `1.2` the
/// prefix range, `lo:hi` / `lo:` / `:hi` / `:` ranges.
fn parse_entry(s: &str) -> Result<VersionListEntry> {
    if let Some(exact) = s.strip_prefix('=') {
        return Ok(VersionListEntry::Version(Version::Standard(
            StandardVersion::parse(exact)?,
        )));
    }
    if s.starts_with("git.") || (s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())) {
        return Ok(VersionListEntry::Version(Version::parse(s)?));
    }
    Ok(VersionListEntry::Range(s.parse()?))
}

impl fmt::Display for VersionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.entries.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for VersionList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VersionList::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> StandardVersion {
        StandardVersion::parse(s).unwrap()
    }

    fn r(s: &str) -> ClosedOpenRange {
        s.parse().unwrap()
    }

    // === Range tests ===

    #[test]
    fn test_range_construction_rejects_inverted_bounds() {
        assert!(ClosedOpenRange::new(v("2.0"), v("1.0")).is_err());
        assert!(ClosedOpenRange::from_inclusive(v("2.0"), v("1.0")).is_err());
    }

    #[test]
    fn test_range_prefix_semantics() {
        let range = r(":2.0");
        assert!(range.contains(&v("2.0")));
        assert!(range.contains(&v("2.0.5")));
        assert!(!range.contains(&v("2.1")));
    }

    #[test]
    fn test_range_contains_bounds() {
        let range = r("1.0:2.0");
        assert!(range.contains(&v("1.0")));
        assert!(range.contains(&v("1.5")));
        assert!(range.contains(&v("2.0")));
        assert!(!range.contains(&v("0.9")));
        assert!(!range.contains(&v("2.1")));
    }

    #[test]
    fn test_range_display_roundtrip() {
        for s in ["1.0:2.0", "1.0:", ":2.0", ":", "1.2"] {
            let range = r(s);
            assert_eq!(range.to_string(), s);
            assert_eq!(r(&range.to_string()), range);
        }
    }

    #[test]
    fn test_single_point_range_prints_bare() {
        let range = ClosedOpenRange::from_inclusive(v("1.2"), v("1.2")).unwrap();
        assert_eq!(range.to_string(), "1.2");
    }

    #[test]
    fn test_range_intersection() {
        let a = r("1.0:2.0");
        let b = r("1.5:3.0");
        let both = a.intersection(&b).unwrap();
        assert!(both.contains(&v("1.5")));
        assert!(both.contains(&v("2.0")));
        assert!(!both.contains(&v("2.2")));
        assert!(a.intersection(&r("5.0:6.0")).is_none());
    }

    #[test]
    fn test_range_satisfies_is_subset() {
        assert!(r("1.2:1.4").satisfies(&r("1.0:2.0")));
        assert!(!r("1.2:2.5").satisfies(&r("1.0:2.0")));
        assert!(r("1.2").satisfies(&r(":")));
    }

    #[test]
    fn test_range_union_contiguous() {
        let merged = r("1.0:2.0").union(&r("2.0:3.0")).unwrap();
        assert_eq!(merged.to_string(), "1.0:3.0");
        assert!(r("1.0:1.5").union(&r("3.0:4.0")).is_none());
    }

    // === VersionList tests ===

    #[test]
    fn test_list_reduces_overlapping_ranges() {
        let list = VersionList::parse("1.0:2.0,2.0:3.0").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list.to_string(), "1.0:3.0");
    }

    #[test]
    fn test_list_keeps_disjoint_ranges_sorted() {
        let list = VersionList::parse("3.0:4.0,1.0:1.5").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.to_string(), "1.0:1.5,3.0:4.0");
    }

    #[test]
    fn test_list_reduction_after_any_add_sequence() {
        let mut list = VersionList::new();
        for s in ["2.0:2.5", "1.0:1.2", "2.4:3.0", "1.1:1.9", "1.9:2.1"] {
            list.add(VersionListEntry::Range(r(s)));
        }
        assert_eq!(list.to_string(), "1.0:3.0");
    }

    #[test]
    fn test_list_absorbs_contained_point() {
        let mut list = VersionList::parse("1.0:2.0").unwrap();
        list.add(VersionListEntry::Version(Version::parse("1.5").unwrap()));
        assert_eq!(list.len(), 1);
        assert_eq!(list.to_string(), "1.0:2.0");
    }

    #[test]
    fn test_list_keeps_distinct_points() {
        let list = VersionList::parse("=2.0,=2.1").unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.concrete().is_none());
    }

    #[test]
    fn test_list_concrete_singleton() {
        let list = VersionList::parse("=1.2.3").unwrap();
        let c = list.concrete().unwrap();
        assert_eq!(c.to_string(), "1.2.3");
    }

    #[test]
    fn test_list_satisfies_subset() {
        let narrow = VersionList::parse("1.2:1.4").unwrap();
        let wide = VersionList::parse("1.0:2.0").unwrap();
        assert!(narrow.satisfies(&wide));
        assert!(!wide.satisfies(&narrow));
    }

    #[test]
    fn test_list_intersection() {
        let a = VersionList::parse("1.0:2.0,4.0:5.0").unwrap();
        let b = VersionList::parse("1.5:4.2").unwrap();
        let both = a.intersection(&b);
        assert_eq!(both.to_string(), "1.5:2.0,4.0:4.2");
    }

    #[test]
    fn test_list_contains_version() {
        let list = VersionList::parse("1.0:2.0,=3.1").unwrap();
        assert!(list.contains_version(&Version::parse("1.7").unwrap()));
        assert!(list.contains_version(&Version::parse("3.1").unwrap()));
        assert!(!list.contains_version(&Version::parse("2.5").unwrap()));
    }

    #[test]
    fn test_contained_git_entry_absorbed_by_range() {
        let mut list = VersionList::parse("1.0:2.0").unwrap();
        let git = Version::parse("git.abc123=1.5").unwrap();
        list.add(VersionListEntry::Version(git.clone()));
        assert_eq!(list.len(), 1);
        assert!(list.contains_version(&git));
    }

    #[test]
    fn test_unresolved_git_entry_kept_as_point() {
        let mut list = VersionList::parse("1.0:2.0").unwrap();
        let git = Version::parse("git.abc123").unwrap();
        list.add(VersionListEntry::Version(git.clone()));
        assert_eq!(list.len(), 2);
        assert!(list.contains_version(&git));
    }

    #[test]
    fn test_any_list() {
        let list = VersionList::any();
        assert!(list.is_any());
        assert!(list.contains_version(&Version::parse("17.0.1").unwrap()));
    }
}
