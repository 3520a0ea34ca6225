use std::any::Any;
use std::any::TypeId;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use dashmap::DashMap;

/// Any type that is Clone, Send, Sync and 'static can be stored in the context.
pub trait ContextValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> ContextValue for T {}

/// The opaque per-request value threaded through a delegation to executors
/// and merged type resolvers.
///
/// Values are stored by type and cloned when retrieved. Wrap expensive values
/// in an `Arc` before inserting them. Clones of a context share its storage.
#[derive(Clone, Default)]
pub struct Context {
    entries: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync + 'static>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a clone of the value stored for type `T`.
    pub fn get<T: ContextValue>(&self) -> Option<T> {
        let type_id = TypeId::of::<T>();
        let value = self.entries.get(&type_id)?.value().clone();
        value.downcast::<T>().ok().map(|value| value.deref().clone())
    }

    /// Inserts a value, replacing any existing value of the same type.
    pub fn insert<T: ContextValue>(&self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Removes the value stored for type `T`, returning it.
    pub fn remove<T: ContextValue>(&self) -> Option<T> {
        let (_, value) = self.entries.remove(&TypeId::of::<T>())?;
        value.downcast::<T>().ok().map(|value| value.deref().clone())
    }

    pub fn contains<T: ContextValue>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Tenant(String);

    #[test]
    fn values_are_keyed_by_type() {
        let context = Context::new();
        context.insert(42_i32);
        context.insert(Tenant("acme".to_owned()));

        assert_eq!(context.get::<i32>(), Some(42));
        assert_eq!(context.get::<Tenant>(), Some(Tenant("acme".to_owned())));
        assert_eq!(context.get::<String>(), None);
    }

    #[test]
    fn clones_share_storage() {
        let context = Context::new();
        let clone = context.clone();
        clone.insert(Tenant("acme".to_owned()));

        assert!(context.contains::<Tenant>());
        assert_eq!(context.remove::<Tenant>(), Some(Tenant("acme".to_owned())));
        assert!(!clone.contains::<Tenant>());
    }
}
