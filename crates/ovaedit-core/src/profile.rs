//! Configuration profile identifiers and profile sets.
//!
//! A hardware value applies either to named deployment profiles or to the
//! [`Profile::Default`] sentinel, which stands for "every profile that does not
//! explicitly override this value, including profiles created later".

use std::collections::BTreeSet;
use std::fmt;

/// A configuration profile identifier.
///
/// `Default` sorts before every named profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Profile {
    /// Applies unless a named profile overrides it.
    Default,
    /// A profile declared in the DeploymentOptionSection.
    Named(String),
}

impl Profile {
    /// Create a named profile.
    pub fn named(name: impl Into<String>) -> Self {
        Profile::Named(name.into())
    }

    /// The profile name, or `None` for the default sentinel.
    pub fn name(&self) -> Option<&str> {
        match self {
            Profile::Default => None,
            Profile::Named(name) => Some(name),
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Profile::Default)
    }
}

impl From<&str> for Profile {
    fn from(name: &str) -> Self {
        Profile::Named(name.to_string())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Default => write!(f, "(default)"),
            Profile::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A set of profiles a single property value applies to.
///
/// After [`ProfileSet::normalize`] a set is either exactly `{Default}` or
/// contains no `Default` at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProfileSet(BTreeSet<Profile>);

impl ProfileSet {
    /// An empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// The set `{Default}`.
    pub fn default_only() -> Self {
        Self::from_profiles([Profile::Default])
    }

    /// Build a set from any profile iterator.
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self(profiles.into_iter().collect())
    }

    /// Build a set of named profiles.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self(names.iter().map(|n| Profile::named(n.as_ref())).collect())
    }

    /// Parse an `ovf:configuration` attribute value.
    ///
    /// An absent or blank attribute means the default profile.
    pub fn from_config_attr(attr: Option<&str>) -> Self {
        let names: BTreeSet<Profile> = attr
            .unwrap_or("")
            .split_whitespace()
            .map(Profile::named)
            .collect();
        if names.is_empty() {
            Self::default_only()
        } else {
            Self(names)
        }
    }

    /// Render for an `ovf:configuration` attribute; the default set renders
    /// as an empty string.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .filter_map(Profile::name)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn contains(&self, profile: &Profile) -> bool {
        self.0.contains(profile)
    }

    pub fn contains_default(&self) -> bool {
        self.0.contains(&Profile::Default)
    }

    /// True if this is exactly `{Default}`.
    pub fn is_default_only(&self) -> bool {
        self.0.len() == 1 && self.contains_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, profile: Profile) -> bool {
        self.0.insert(profile)
    }

    pub fn remove(&mut self, profile: &Profile) -> bool {
        self.0.remove(profile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.0.iter()
    }

    /// Named profiles only.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(Profile::name)
    }

    pub fn union(&self, other: &ProfileSet) -> ProfileSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn intersection(&self, other: &ProfileSet) -> ProfileSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &ProfileSet) -> ProfileSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &ProfileSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn is_disjoint(&self, other: &ProfileSet) -> bool {
        self.0.is_disjoint(&other.0)
    }

    pub fn extend(&mut self, other: &ProfileSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Collapse `{Default, A, ...}` into `{Default}`.
    ///
    /// Returns true if the set changed.
    pub fn normalize(&mut self) -> bool {
        if self.contains_default() && self.0.len() > 1 {
            self.0.retain(Profile::is_default);
            true
        } else {
            false
        }
    }
}

impl FromIterator<Profile> for ProfileSet {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ProfileSet {
    type Item = &'a Profile;
    type IntoIter = std::collections::btree_set::Iter<'a, Profile>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
