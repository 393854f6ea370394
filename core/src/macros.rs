//! Declarative macros for capability declarations.

/// Build a [`CapabilitySet`](crate::capability::CapabilitySet) from capability types.
///
/// # Example
///
/// ```rust
/// use courier_core::capabilities;
/// use courier_core::capability::Capability;
///
/// struct OrderCategory;
/// impl Capability for OrderCategory {}
///
/// struct Audited;
/// impl Capability for Audited {}
///
/// let set = capabilities![OrderCategory, Audited];
/// assert_eq!(set.len(), 2);
/// assert!(capabilities![].is_empty());
/// ```
#[macro_export]
macro_rules! capabilities {
    () => {
        $crate::capability::CapabilitySet::new()
    };
    ($($capability:ty),+ $(,)?) => {
        $crate::capability::CapabilitySet::new()
            $(.with::<$capability>())+
    };
}

/// Implement [`Notification`](crate::notification::Notification) with a fixed capability list.
///
/// # Example
///
/// ```rust
/// use courier_core::capability::Capability;
/// use courier_core::notification::Notification;
/// use courier_core::notification;
///
/// struct OrderCategory;
/// impl Capability for OrderCategory {}
///
/// struct OrderPlaced;
/// struct UserLoggedIn;
///
/// notification!(OrderPlaced: OrderCategory);
/// notification!(UserLoggedIn);
///
/// assert!(OrderPlaced::capabilities().has::<OrderCategory>());
/// assert!(UserLoggedIn::capabilities().is_empty());
/// ```
#[macro_export]
macro_rules! notification {
    ($shape:ty) => {
        impl $crate::notification::Notification for $shape {}
    };
    ($shape:ty : $($capability:ty),+ $(,)?) => {
        impl $crate::notification::Notification for $shape {
            fn capabilities() -> $crate::capability::CapabilitySet {
                $crate::capabilities![$($capability),+]
            }
        }
    };
}
