//! Notification shapes and the envelope they travel in through middleware.

use crate::capability::CapabilitySet;
use crate::shape::Shape;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// An event with no return value, delivered to zero or more processors.
///
/// A notification declares the capability tags it carries. Constrained
/// middleware consults them to decide whether it joins the pipeline.
///
/// # Example
///
/// ```
/// use courier_core::capabilities;
/// use courier_core::capability::{Capability, CapabilitySet};
/// use courier_core::notification::Notification;
///
/// struct OrderCategory;
/// impl Capability for OrderCategory {}
///
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl Notification for OrderPlaced {
///     fn capabilities() -> CapabilitySet {
///         capabilities![OrderCategory]
///     }
/// }
///
/// assert!(OrderPlaced::capabilities().has::<OrderCategory>());
/// ```
pub trait Notification: Send + Sync + Sized + 'static {
    /// Capabilities every value of this shape declares.
    #[must_use]
    fn capabilities() -> CapabilitySet {
        CapabilitySet::new()
    }

    /// Capabilities this particular value declares.
    ///
    /// Defaults to [`Notification::capabilities`]; override when membership
    /// depends on the instance.
    #[must_use]
    fn instance_capabilities(&self) -> CapabilitySet {
        Self::capabilities()
    }
}

/// A published notification as seen by middleware: shape, capabilities and payload.
///
/// Cloning is cheap; the payload is shared.
#[derive(Clone)]
pub struct NotificationEnvelope {
    shape: Shape,
    capabilities: CapabilitySet,
    payload: Arc<dyn Any + Send + Sync>,
}

impl NotificationEnvelope {
    /// Wrap a notification, capturing its instance capabilities.
    #[must_use]
    pub fn new<N: Notification>(notification: N) -> Self {
        let capabilities = notification.instance_capabilities();
        Self {
            shape: Shape::of::<N>(),
            capabilities,
            payload: Arc::new(notification),
        }
    }

    /// Shape of the wrapped notification.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Capabilities the wrapped value declared.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Borrow the payload as `N`, if that is its type.
    #[must_use]
    pub fn downcast_ref<N: Notification>(&self) -> Option<&N> {
        self.payload.downcast_ref::<N>()
    }

    /// Whether the payload is an `N`.
    #[must_use]
    pub fn is<N: Notification>(&self) -> bool {
        self.payload.is::<N>()
    }
}

impl fmt::Debug for NotificationEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationEnvelope")
            .field("shape", &self.shape)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
