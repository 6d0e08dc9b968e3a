//! Event envelope and runtime type descriptors.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Runtime descriptor of an event type.
///
/// Two descriptors are equal when they describe the same Rust type. Any
/// `'static` type can be an event type, including trait-object types such
/// as `dyn Auditable`, which act as interfaces once declared as ancestors in
/// a [`TypeHierarchy`](crate::TypeHierarchy).
#[derive(Clone, Copy)]
pub struct EventType {
    id: TypeId,
    name: &'static str,
}

impl EventType {
    /// Descriptor for `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The universal root type every event is assignable to.
    ///
    /// The root is never part of a resolved ancestor set and a non-dynamic
    /// subscriber may not declare interest in it.
    #[must_use]
    pub fn root() -> Self {
        Self::of::<dyn Any + Send + Sync>()
    }

    /// Whether this is the universal root type.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.id == TypeId::of::<dyn Any + Send + Sync>()
    }

    /// The underlying [`TypeId`].
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path (`orders::OrderPlaced` → `OrderPlaced`).
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventType").field(&self.name).finish()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("any")
        } else {
            f.write_str(self.short_name())
        }
    }
}

/// Strip the module path from a type name, leaving generic arguments intact.
pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    let head_end = name.find('<').unwrap_or(name.len());
    let start = name[..head_end].rfind("::").map_or(0, |i| i.saturating_add(2));
    &name[start..]
}

/// A value published to the bus.
///
/// The envelope is cheap to clone: every consumer queue that accepts the
/// event holds a reference to the same payload.
#[derive(Clone)]
pub struct Event {
    ty: EventType,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Event {
    /// Wrap a value.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value.
    #[must_use]
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            ty: EventType::of::<T>(),
            payload: value,
        }
    }

    /// Exact runtime type of the payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.ty
    }

    /// Borrow the payload as `T` if that is its exact type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.payload).downcast_ref::<T>()
    }

    /// Whether the payload's exact type is `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        (*self.payload).is::<T>()
    }

    /// Shared handle to the type-erased payload.
    #[must_use]
    pub fn payload(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.payload
    }

    /// Whether both envelopes share the same payload allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.payload), Arc::as_ptr(&other.payload))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.ty.name())
            .finish_non_exhaustive()
    }
}
