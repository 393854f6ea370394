//! Capability tags and the constraints notification middleware declare over them.
//!
//! A capability is a zero-sized marker type a notification shape declares
//! membership of (for example "this is an order-category event"). Middleware
//! registered with a [`CapabilityConstraint`] only joins the pipeline of
//! notifications whose declared capabilities satisfy it.
//!
//! Capabilities are declared as data ([`CapabilitySet`]) rather than
//! discovered by introspection, so the same answer is produced by dispatch and
//! by the inspector for every `(middleware, shape)` pair.
//!
//! # Example
//!
//! ```
//! use courier_core::capabilities;
//! use courier_core::capability::{Capability, CapabilityConstraint};
//!
//! struct OrderCategory;
//! impl Capability for OrderCategory {}
//!
//! struct Audited;
//! impl Capability for Audited {}
//!
//! let declared = capabilities![OrderCategory];
//! let constraint = CapabilityConstraint::requires::<OrderCategory>();
//!
//! assert!(constraint.evaluate(&declared).unwrap_or(false));
//! assert!(!CapabilityConstraint::requires::<Audited>().evaluate(&declared).unwrap_or(true));
//! ```

use crate::error::BoxError;
use crate::shape::short_type_name;
use smallvec::SmallVec;
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Marker trait for capability tags.
///
/// Implement it on a unit struct; the tag's name defaults to the type name.
pub trait Capability: 'static {
    /// Human readable name used in diagnostics.
    #[must_use]
    fn name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// Runtime identity of a [`Capability`] type.
#[derive(Clone, Copy)]
pub struct CapabilityId {
    type_id: TypeId,
    name: &'static str,
}

impl CapabilityId {
    /// Identity of capability `C`.
    #[must_use]
    pub fn of<C: Capability>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            name: C::name(),
        }
    }

    /// Diagnostic name of the capability.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for CapabilityId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for CapabilityId {}

impl Hash for CapabilityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The set of capabilities a notification declares.
///
/// Small and de-duplicated; insertion order is preserved for diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    items: SmallVec<[CapabilityId; 4]>,
}

impl CapabilitySet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add capability `C` (builder style).
    #[must_use]
    pub fn with<C: Capability>(mut self) -> Self {
        self.insert(CapabilityId::of::<C>());
        self
    }

    /// Add a capability by identity. Duplicates are ignored.
    pub fn insert(&mut self, id: CapabilityId) {
        if !self.items.contains(&id) {
            self.items.push(id);
        }
    }

    /// Whether capability `C` is declared.
    #[must_use]
    pub fn has<C: Capability>(&self) -> bool {
        self.contains(&CapabilityId::of::<C>())
    }

    /// Whether the capability with this identity is declared.
    #[must_use]
    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.items.contains(id)
    }

    /// Merge another set into this one.
    #[must_use]
    pub fn union(mut self, other: &Self) -> Self {
        for id in &other.items {
            self.insert(*id);
        }
        self
    }

    /// Iterate declared capabilities.
    pub fn iter(&self) -> impl Iterator<Item = &CapabilityId> {
        self.items.iter()
    }

    /// Names of the declared capabilities, in declaration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(CapabilityId::name).collect()
    }

    /// Number of declared capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no capability is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<CapabilityId> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Predicate signature for [`CapabilityConstraint::Custom`].
pub type CapabilityPredicate = Arc<dyn Fn(&CapabilitySet) -> Result<bool, BoxError> + Send + Sync>;

/// Decides whether a notification middleware participates for a given shape.
///
/// Evaluation is pure: it looks only at the declared capability set.
#[derive(Clone, Default)]
pub enum CapabilityConstraint {
    /// Applies to every notification.
    #[default]
    General,

    /// Applies when the capability is declared.
    Requires(CapabilityId),

    /// Applies when every listed capability is declared.
    AllOf(Vec<CapabilityId>),

    /// Applies when at least one listed capability is declared.
    AnyOf(Vec<CapabilityId>),

    /// Arbitrary predicate over the declared set. The only variant that can fail.
    Custom {
        /// Name reported by the inspector.
        name: &'static str,
        /// The predicate itself.
        predicate: CapabilityPredicate,
    },
}

impl CapabilityConstraint {
    /// Constraint requiring capability `C`.
    #[must_use]
    pub fn requires<C: Capability>() -> Self {
        Self::Requires(CapabilityId::of::<C>())
    }

    /// Constraint backed by a custom predicate.
    pub fn custom<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&CapabilitySet) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Self::Custom {
            name,
            predicate: Arc::new(predicate),
        }
    }

    /// Whether this is the unconstrained variant.
    #[must_use]
    pub const fn is_general(&self) -> bool {
        matches!(self, Self::General)
    }

    /// Evaluate against a declared capability set.
    ///
    /// # Errors
    ///
    /// Only [`CapabilityConstraint::Custom`] can fail, with whatever its predicate returns.
    pub fn evaluate(&self, capabilities: &CapabilitySet) -> Result<bool, BoxError> {
        match self {
            Self::General => Ok(true),
            Self::Requires(id) => Ok(capabilities.contains(id)),
            Self::AllOf(ids) => Ok(ids.iter().all(|id| capabilities.contains(id))),
            Self::AnyOf(ids) => Ok(ids.iter().any(|id| capabilities.contains(id))),
            Self::Custom { predicate, .. } => predicate(capabilities),
        }
    }

    /// Capability names the constraint refers to. Empty for `General` and `Custom`.
    #[must_use]
    pub fn categories(&self) -> Vec<&'static str> {
        match self {
            Self::General | Self::Custom { .. } => Vec::new(),
            Self::Requires(id) => vec![id.name()],
            Self::AllOf(ids) | Self::AnyOf(ids) => ids.iter().map(CapabilityId::name).collect(),
        }
    }
}

impl fmt::Display for CapabilityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => f.write_str("none"),
            Self::Requires(id) => write!(f, "requires {id}"),
            Self::AllOf(ids) => write!(f, "requires all of [{}]", join(ids)),
            Self::AnyOf(ids) => write!(f, "requires any of [{}]", join(ids)),
            Self::Custom { name, .. } => write!(f, "custom '{name}'"),
        }
    }
}

impl fmt::Debug for CapabilityConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityConstraint({self})")
    }
}

fn join(ids: &[CapabilityId]) -> String {
    ids.iter().map(CapabilityId::name).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct OrderCategory;
    impl Capability for OrderCategory {}

    struct Audited;
    impl Capability for Audited {
        fn name() -> &'static str {
            "audit"
        }
    }

    #[test]
    fn test_set_deduplicates() {
        let set = CapabilitySet::new()
            .with::<OrderCategory>()
            .with::<OrderCategory>()
            .with::<Audited>();
        assert_eq!(set.len(), 2);
        assert_eq!(set.names(), vec!["OrderCategory", "audit"]);
    }

    #[test]
    fn test_constraint_variants() {
        let orders = CapabilitySet::new().with::<OrderCategory>();
        let order = CapabilityId::of::<OrderCategory>();
        let audit = CapabilityId::of::<Audited>();

        assert!(CapabilityConstraint::General.evaluate(&CapabilitySet::new()).unwrap_or(false));
        assert!(CapabilityConstraint::Requires(order).evaluate(&orders).unwrap_or(false));
        assert!(!CapabilityConstraint::AllOf(vec![order, audit]).evaluate(&orders).unwrap_or(true));
        assert!(CapabilityConstraint::AnyOf(vec![order, audit]).evaluate(&orders).unwrap_or(false));
    }

    #[test]
    fn test_custom_constraint_can_fail() {
        let constraint = CapabilityConstraint::custom("broken", |_| Err("no".into()));
        assert!(constraint.evaluate(&CapabilitySet::new()).is_err());
        assert_eq!(constraint.to_string(), "custom 'broken'");
        assert!(constraint.categories().is_empty());
    }

    #[test]
    fn test_display_names_capabilities() {
        let constraint = CapabilityConstraint::requires::<OrderCategory>();
        assert_eq!(constraint.to_string(), "requires OrderCategory");
        assert_eq!(constraint.categories(), vec!["OrderCategory"]);
    }

    struct UserCategory;
    impl Capability for UserCategory {}

    struct Billing;
    impl Capability for Billing {}

    fn pool() -> [CapabilityId; 4] {
        [
            CapabilityId::of::<OrderCategory>(),
            CapabilityId::of::<Audited>(),
            CapabilityId::of::<UserCategory>(),
            CapabilityId::of::<Billing>(),
        ]
    }

    fn pick(indices: &[usize]) -> Vec<CapabilityId> {
        let pool = pool();
        indices.iter().map(|&index| pool[index]).collect()
    }

    proptest! {
        #[test]
        fn prop_combinators_agree_with_requires(
            declared in prop::collection::vec(0usize..4, 0..6),
            listed in prop::collection::vec(0usize..4, 0..4),
        ) {
            let set: CapabilitySet = pick(&declared).into_iter().collect();
            let listed = pick(&listed);
            let singles: Vec<bool> = listed
                .iter()
                .map(|id| CapabilityConstraint::Requires(*id).evaluate(&set).unwrap_or(false))
                .collect();

            let all = CapabilityConstraint::AllOf(listed.clone()).evaluate(&set).unwrap_or(false);
            let any = CapabilityConstraint::AnyOf(listed).evaluate(&set).unwrap_or(false);

            prop_assert_eq!(all, singles.iter().all(|&hit| hit));
            prop_assert_eq!(any, singles.iter().any(|&hit| hit));
        }

        #[test]
        fn prop_set_holds_each_capability_once(declared in prop::collection::vec(0usize..4, 0..12)) {
            let set: CapabilitySet = pick(&declared).into_iter().collect();
            let mut distinct = declared.clone();
            distinct.sort_unstable();
            distinct.dedup();

            prop_assert_eq!(set.len(), distinct.len());
        }
    }
}
