//! Isolation policy
//!
//! A policy names the archives a boundary loads from and the symbol
//! prefixes it claims. Routing is an ordered rule list:
//!
//! 1. excluded prefix  -> delegate to the parent, never touch isolated archives
//! 2. included prefix  -> load from the isolated archives (cached per boundary)
//! 3. anything else    -> delegate to the parent, falling back to the search path
//!
//! Exclusion is checked before inclusion, so it always wins.

use crate::archive::Archive;
use crate::symbol;
use std::collections::BTreeSet;
use std::fmt;

/// Where a symbol request is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Matched an excluded prefix: parent only
    Excluded,
    /// Matched an included prefix: isolated archives only
    Isolated,
    /// Matched nothing: parent first, then the boundary's search path
    Delegated,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Excluded => write!(f, "excluded"),
            Route::Isolated => write!(f, "isolated"),
            Route::Delegated => write!(f, "delegated"),
        }
    }
}

/// Immutable description of an isolation boundary
#[derive(Debug, Clone, Default)]
pub struct IsolationPolicy {
    archives: Vec<Archive>,
    included: BTreeSet<String>,
    excluded: BTreeSet<String>,
    discover: bool,
    discovery_ignores: Vec<String>,
    share_ambient: bool,
}

impl IsolationPolicy {
    /// Start building a policy
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Isolated archives, in precedence order
    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Included prefixes
    pub fn included(&self) -> &BTreeSet<String> {
        &self.included
    }

    /// Excluded prefixes
    pub fn excluded(&self) -> &BTreeSet<String> {
        &self.excluded
    }

    /// Whether packages found by scanning the archives are included too
    pub fn discovers(&self) -> bool {
        self.discover
    }

    /// Prefixes ignored during discovery
    pub fn discovery_ignores(&self) -> &[String] {
        &self.discovery_ignores
    }

    /// Whether the boundary reuses its parent's ambient store
    pub fn shares_ambient(&self) -> bool {
        self.share_ambient
    }

    /// Route a symbol request
    pub fn route(&self, symbol_name: &str) -> Route {
        if symbol::matches_any(symbol_name, &self.excluded) {
            Route::Excluded
        } else if symbol::matches_any(symbol_name, &self.included) {
            Route::Isolated
        } else {
            Route::Delegated
        }
    }

    /// Copy of this policy with `discovered` added to the included prefixes
    pub(crate) fn with_discovered(&self, discovered: BTreeSet<String>) -> Self {
        let mut policy = self.clone();
        policy.included.extend(discovered);
        policy
    }
}

/// Builder for [`IsolationPolicy`]
#[derive(Debug, Clone, Default)]
pub struct PolicyBuilder {
    policy: IsolationPolicy,
}

impl PolicyBuilder {
    /// Append an isolated archive (earlier archives take precedence)
    pub fn archive(mut self, archive: Archive) -> Self {
        self.policy.archives.push(archive);
        self
    }

    /// Append several isolated archives
    pub fn archives(mut self, archives: impl IntoIterator<Item = Archive>) -> Self {
        self.policy.archives.extend(archives);
        self
    }

    /// Claim a prefix for the boundary
    pub fn include(mut self, prefix: impl Into<String>) -> Self {
        self.policy.included.insert(prefix.into());
        self
    }

    /// Always delegate a prefix to the parent
    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.policy.excluded.insert(prefix.into());
        self
    }

    /// Include every package found in the isolated archives
    pub fn discover(mut self, discover: bool) -> Self {
        self.policy.discover = discover;
        self
    }

    /// Skip packages under `prefix` during discovery
    pub fn ignore(mut self, prefix: impl Into<String>) -> Self {
        self.policy.discovery_ignores.push(prefix.into());
        self
    }

    /// Reuse the parent's ambient store instead of a boundary-local one
    pub fn share_ambient(mut self, share: bool) -> Self {
        self.policy.share_ambient = share;
        self
    }

    /// Finish the policy
    pub fn build(self) -> IsolationPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> IsolationPolicy {
        IsolationPolicy::builder()
            .include("pkg.isolated")
            .exclude("pkg.isolated.internal")
            .build()
    }

    #[test]
    fn test_route_included() {
        assert_eq!(policy().route("pkg.isolated.Foo"), Route::Isolated);
    }

    #[test]
    fn test_exclusion_wins_over_inclusion() {
        let policy = policy();
        assert_eq!(policy.route("pkg.isolated.internal.Bar"), Route::Excluded);

        // same prefix on both sides still delegates
        let both = IsolationPolicy::builder()
            .include("pkg.shared")
            .exclude("pkg.shared")
            .build();
        assert_eq!(both.route("pkg.shared.X"), Route::Excluded);
    }

    #[test]
    fn test_route_default_delegates() {
        assert_eq!(policy().route("other.Thing"), Route::Delegated);
        assert_eq!(IsolationPolicy::default().route("anything"), Route::Delegated);
    }

    #[test]
    fn test_with_discovered_unions_prefixes() {
        let discovered: BTreeSet<String> = ["found.pkg".to_string()].into_iter().collect();
        let effective = policy().with_discovered(discovered);

        assert!(effective.included().contains("pkg.isolated"));
        assert!(effective.included().contains("found.pkg"));
        assert_eq!(effective.route("found.pkg.Unit"), Route::Isolated);
    }

    #[test]
    fn test_builder_flags() {
        let policy = IsolationPolicy::builder()
            .archive(Archive::directory("lib"))
            .discover(true)
            .ignore("meta")
            .share_ambient(true)
            .build();

        assert_eq!(policy.archives().len(), 1);
        assert!(policy.discovers());
        assert_eq!(policy.discovery_ignores(), &["meta".to_string()]);
        assert!(policy.shares_ambient());
    }
}
