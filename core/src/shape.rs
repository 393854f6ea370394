//! Nominal identities for requests, notifications, handlers and middleware.
//!
//! A [`Shape`] is the dispatch key: two values of the same Rust type always
//! share a shape, regardless of their contents. Shapes compare and hash by
//! [`TypeId`], and render as the type name with its module path removed.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The nominal identity of a request or notification type.
///
/// # Example
///
/// ```
/// use courier_core::shape::Shape;
///
/// struct CreateThing;
///
/// let shape = Shape::of::<CreateThing>();
/// assert_eq!(shape.name(), "CreateThing");
/// assert_eq!(shape, Shape::of::<CreateThing>());
/// ```
#[derive(Clone, Copy)]
pub struct Shape {
    type_id: TypeId,
    full_name: &'static str,
}

impl Shape {
    /// The shape of `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            full_name: std::any::type_name::<T>(),
        }
    }

    /// The [`TypeId`] this shape is keyed on.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name without its module path (`CreateThing`, `Envelope<app::Order>`).
    #[must_use]
    pub fn name(&self) -> &'static str {
        strip_module_path(self.full_name)
    }

    /// Fully qualified type name as reported by [`std::any::type_name`].
    #[must_use]
    pub const fn full_name(&self) -> &'static str {
        self.full_name
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for Shape {}

impl Hash for Shape {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shape").field(&self.name()).finish()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl serde::Serialize for Shape {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Short type name of `T`, used to label handlers, middleware and subscribers.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    strip_module_path(std::any::type_name::<T>())
}

/// Drops the module path of the outermost type. Generic arguments are kept verbatim.
fn strip_module_path(full: &'static str) -> &'static str {
    let head_end = full.find('<').unwrap_or(full.len());
    let head = full.get(..head_end).unwrap_or(full);
    let start = head.rfind("::").map_or(0, |idx| idx + 2);
    full.get(start..).unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;
    #[allow(dead_code)]
    struct Wrapper<T>(T);

    #[test]
    fn test_shape_name_strips_module_path() {
        assert_eq!(Shape::of::<Plain>().name(), "Plain");
        assert!(Shape::of::<Plain>().full_name().ends_with("shape::tests::Plain"));
    }

    #[test]
    fn test_generic_shape_keeps_arguments() {
        let name = Shape::of::<Wrapper<Plain>>().name();
        assert!(name.starts_with("Wrapper<"));
        assert!(name.ends_with("Plain>"));
    }

    #[test]
    fn test_shape_identity_is_by_type() {
        assert_eq!(Shape::of::<Plain>(), Shape::of::<Plain>());
        assert_ne!(Shape::of::<Plain>(), Shape::of::<Wrapper<Plain>>());
    }

    #[test]
    fn test_primitive_names() {
        assert_eq!(short_type_name::<u32>(), "u32");
        assert_eq!(short_type_name::<String>(), "String");
    }
}
