//! Find-or-create registry for shared external resources
//!
//! Resources are singletons keyed by type and identity within one partition
//! space (one running network). They are constructed lazily on first lookup,
//! exactly once, and are never torn down while the space is alive.
//!
//! # Example
//!
//! ```
//! use std::sync::Mutex;
//! use tempora_core::{Registry, Resource};
//!
//! #[derive(Default)]
//! struct Counter(Mutex<u64>);
//!
//! impl Resource for Counter {
//!     fn create(_space: &str, _identity: &str) -> Self {
//!         Counter::default()
//!     }
//! }
//!
//! let registry = Registry::new("demo");
//! let a = registry.locate::<Counter>("hits");
//! let b = registry.locate::<Counter>("hits");
//! *a.0.lock().unwrap() += 1;
//! assert_eq!(*b.0.lock().unwrap(), 1);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A lazily constructed shared resource
pub trait Resource: Send + Sync + 'static {
    /// Build the resource for `identity` inside partition space `space`
    fn create(space: &str, identity: &str) -> Self;
}

type Slot = Arc<dyn Any + Send + Sync>;

/// Internally synchronized resource table for one partition space
pub struct Registry {
    space: String,
    slots: Mutex<HashMap<(TypeId, String), Slot>>,
}

impl Registry {
    /// Create an empty registry for a partition space
    pub fn new(space: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the partition space this registry serves
    pub fn space(&self) -> &str {
        &self.space
    }

    /// Find the resource of type `R` for `identity`, creating it on first use
    ///
    /// Idempotent per identity: every call returns the same instance.
    pub fn locate<R: Resource>(&self, identity: &str) -> Arc<R> {
        let key = (TypeId::of::<R>(), identity.to_string());
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .entry(key)
            .or_insert_with(|| Arc::new(R::create(&self.space, identity)) as Slot)
            .clone();
        drop(slots);
        match slot.downcast::<R>() {
            Ok(resource) => resource,
            // The key includes the TypeId, so the slot always holds an `R`.
            Err(_) => unreachable!("registry slot type does not match its key"),
        }
    }

    /// Number of resources constructed so far
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if no resource has been constructed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("space", &self.space)
            .field("resources", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct Probe {
        identity: String,
        space: String,
    }

    impl Resource for Probe {
        fn create(space: &str, identity: &str) -> Self {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Probe {
                identity: identity.to_string(),
                space: space.to_string(),
            }
        }
    }

    struct Other;

    impl Resource for Other {
        fn create(_space: &str, _identity: &str) -> Self {
            Other
        }
    }

    #[test]
    fn test_locate_is_idempotent() {
        let registry = Registry::new("space");
        let before = CREATED.load(Ordering::SeqCst);
        let a = registry.locate::<Probe>("x");
        let b = registry.locate::<Probe>("x");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(CREATED.load(Ordering::SeqCst) - before, 1);
        assert_eq!(a.identity, "x");
        assert_eq!(a.space, "space");
    }

    #[test]
    fn test_identity_and_type_separate_slots() {
        let registry = Registry::new("space");
        registry.locate::<Probe>("x");
        registry.locate::<Probe>("y");
        registry.locate::<Other>("x");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_locate_creates_once() {
        let registry = Arc::new(Registry::new("threads"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.locate::<Other>("shared"))
            })
            .collect();
        let first = registry.locate::<Other>("shared");
        for handle in handles {
            assert!(Arc::ptr_eq(&first, &handle.join().unwrap()));
        }
        assert_eq!(registry.len(), 1);
    }
}
