//! Named, reference-counted index of long-lived objects.
//!
//! Every subsystem that needs to hand out a durable, lookable-up handle to one
//! of its objects (a NIO, a switch, a VM, ...) registers it here instead of
//! keeping its own ad-hoc table. Entries are bucketed by an object-type tag so
//! that two different kinds of object may share a name, but within one type
//! names are unique.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("object {name:?} of type {obj_type:?} already registered")]
    DuplicateName {
        name: String,
        obj_type: &'static str,
    },
    #[error("no object {name:?} of type {obj_type:?}")]
    NotFound {
        name: String,
        obj_type: &'static str,
    },
    #[error("unref of {name:?} ({obj_type:?}) with refcount already zero")]
    UnrefAtZero {
        name: String,
        obj_type: &'static str,
    },
    #[error("delete of {name:?} ({obj_type:?}) requested with {refcount} outstanding references")]
    StillReferenced {
        name: String,
        obj_type: &'static str,
        refcount: usize,
    },
    #[error("object {name:?} is not of the expected concrete type")]
    WrongConcreteType { name: String },
}

struct Entry {
    name: String,
    obj_type: &'static str,
    data: Arc<dyn Any + Send + Sync>,
    refcount: AtomicUsize,
}

/// A snapshot of one registry slot, returned by lookups that don't need the
/// concrete type (e.g. `module_list`/`foreach_type` style enumeration).
#[derive(Clone)]
pub struct ObjectInfo {
    pub name: String,
    pub obj_type: &'static str,
    pub refcount: usize,
}

#[derive(Default)]
struct Inner {
    by_key: HashMap<(String, &'static str), Arc<Entry>>,
}

/// Process-wide object registry. Construct one instance per hypervisor
/// process and thread it through every subsystem that needs to publish or
/// look up named objects; there is deliberately no hidden global singleton
/// here, see `DESIGN.md`.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers `data` under `name`/`obj_type` with an initial refcount of 1
    /// (the caller's own reference). Fails if the name is already taken
    /// within that type.
    pub fn add<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        obj_type: &'static str,
        data: T,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut inner = self.inner.lock().unwrap();
        let key = (name.clone(), obj_type);
        if inner.by_key.contains_key(&key) {
            return Err(RegistryError::DuplicateName { name, obj_type });
        }
        inner.by_key.insert(
            key,
            Arc::new(Entry {
                name: name.clone(),
                obj_type,
                data: Arc::new(data),
                refcount: AtomicUsize::new(1),
            }),
        );
        tracing::debug!(name, obj_type, "registry: added");
        Ok(())
    }

    /// Looks up `name`/`obj_type` and increments its refcount, returning a
    /// typed clone of the shared object. The caller must eventually call
    /// [`Registry::unref`] exactly once per successful `find`.
    pub fn find<T: Any + Send + Sync>(
        &self,
        name: &str,
        obj_type: &'static str,
    ) -> Result<Arc<T>, RegistryError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .by_key
            .get(&(name.to_string(), obj_type))
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                obj_type,
            })?;
        let typed = entry
            .data
            .clone()
            .downcast::<T>()
            .map_err(|_| RegistryError::WrongConcreteType {
                name: name.to_string(),
            })?;
        entry.refcount.fetch_add(1, Ordering::SeqCst);
        Ok(typed)
    }

    /// Like [`Registry::find`] but does not touch the refcount.
    pub fn exists(&self, name: &str, obj_type: &'static str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.by_key.contains_key(&(name.to_string(), obj_type))
    }

    /// Drops one reference. Errors if the object is unknown or its refcount
    /// is already zero (a double-unref is a caller bug, not a no-op).
    pub fn unref(&self, name: &str, obj_type: &'static str) -> Result<(), RegistryError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .by_key
            .get(&(name.to_string(), obj_type))
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                obj_type,
            })?;
        loop {
            let cur = entry.refcount.load(Ordering::SeqCst);
            if cur == 0 {
                return Err(RegistryError::UnrefAtZero {
                    name: name.to_string(),
                    obj_type,
                });
            }
            if entry
                .refcount
                .compare_exchange(cur, cur - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    pub fn refcount(&self, name: &str, obj_type: &'static str) -> Option<usize> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_key
            .get(&(name.to_string(), obj_type))
            .map(|e| e.refcount.load(Ordering::SeqCst))
    }

    /// Removes the entry unconditionally, requiring its refcount to be zero.
    /// Use [`Registry::delete_if_unused`] when the caller only *hopes* it is
    /// unused.
    pub fn delete(&self, name: &str, obj_type: &'static str) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (name.to_string(), obj_type);
        let refcount = inner
            .by_key
            .get(&key)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                obj_type,
            })?
            .refcount
            .load(Ordering::SeqCst);
        if refcount != 0 {
            return Err(RegistryError::StillReferenced {
                name: name.to_string(),
                obj_type,
                refcount,
            });
        }
        inner.by_key.remove(&key);
        tracing::debug!(name, obj_type, "registry: deleted");
        Ok(())
    }

    /// Deletes `name`/`obj_type` only if its refcount is currently zero,
    /// invoking `on_deleted` while still holding the registry lock so the
    /// caller can run teardown logic atomically with the removal. Returns
    /// whether the deletion happened.
    pub fn delete_if_unused(
        &self,
        name: &str,
        obj_type: &'static str,
        on_deleted: impl FnOnce(),
    ) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (name.to_string(), obj_type);
        let Some(entry) = inner.by_key.get(&key) else {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
                obj_type,
            });
        };
        if entry.refcount.load(Ordering::SeqCst) != 0 {
            return Ok(false);
        }
        inner.by_key.remove(&key);
        drop(inner);
        on_deleted();
        Ok(true)
    }

    /// Enumerates every entry of `obj_type`.
    pub fn foreach_type(&self, obj_type: &'static str) -> Vec<ObjectInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_key
            .values()
            .filter(|e| e.obj_type == obj_type)
            .map(|e| ObjectInfo {
                name: e.name.clone(),
                obj_type: e.obj_type,
                refcount: e.refcount.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Removes every entry of `obj_type` regardless of refcount, returning
    /// how many were removed. Intended for whole-process teardown only.
    pub fn delete_type(&self, obj_type: &'static str) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.by_key.len();
        inner.by_key.retain(|(_, t), _| *t != obj_type);
        before - inner.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_duplicate_name_within_type_fails() {
        let reg = Registry::new();
        reg.add("nio0", "nio", 1u32).unwrap();
        let err = reg.add("nio0", "nio", 2u32).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { .. }));
    }

    #[test]
    fn same_name_different_type_is_fine() {
        let reg = Registry::new();
        reg.add("r1", "vm", 1u32).unwrap();
        reg.add("r1", "frsw", 2u32).unwrap();
        assert!(reg.exists("r1", "vm"));
        assert!(reg.exists("r1", "frsw"));
    }

    #[test]
    fn find_increments_refcount_and_unref_decrements() {
        let reg = Registry::new();
        reg.add("n", "nio", 42u32).unwrap();
        assert_eq!(reg.refcount("n", "nio"), Some(1));
        let v: Arc<u32> = reg.find("n", "nio").unwrap();
        assert_eq!(*v, 42);
        assert_eq!(reg.refcount("n", "nio"), Some(2));
        reg.unref("n", "nio").unwrap();
        assert_eq!(reg.refcount("n", "nio"), Some(1));
    }

    #[test]
    fn unref_below_zero_is_an_error() {
        let reg = Registry::new();
        reg.add("n", "nio", 1u32).unwrap();
        reg.unref("n", "nio").unwrap();
        let err = reg.unref("n", "nio").unwrap_err();
        assert!(matches!(err, RegistryError::UnrefAtZero { .. }));
    }

    #[test]
    fn delete_requires_zero_refcount() {
        let reg = Registry::new();
        reg.add("n", "nio", 1u32).unwrap();
        let err = reg.delete("n", "nio").unwrap_err();
        assert!(matches!(err, RegistryError::StillReferenced { .. }));
        reg.unref("n", "nio").unwrap();
        reg.delete("n", "nio").unwrap();
        assert!(!reg.exists("n", "nio"));
    }

    #[test]
    fn delete_if_unused_runs_teardown_atomically() {
        let reg = Registry::new();
        reg.add("n", "nio", 1u32).unwrap();
        reg.unref("n", "nio").unwrap();
        let mut torn_down = false;
        let deleted = reg.delete_if_unused("n", "nio", || torn_down = true).unwrap();
        assert!(deleted);
        assert!(torn_down);
        assert!(!reg.exists("n", "nio"));
    }

    #[test]
    fn delete_if_unused_is_noop_when_still_referenced() {
        let reg = Registry::new();
        reg.add("n", "nio", 1u32).unwrap();
        let _held: Arc<u32> = reg.find("n", "nio").unwrap();
        let deleted = reg.delete_if_unused("n", "nio", || panic!("must not run")).unwrap();
        assert!(!deleted);
        assert!(reg.exists("n", "nio"));
    }

    #[test]
    fn foreach_type_and_delete_type() {
        let reg = Registry::new();
        reg.add("a", "nio", 1u32).unwrap();
        reg.add("b", "nio", 2u32).unwrap();
        reg.add("c", "vm", 3u32).unwrap();
        assert_eq!(reg.foreach_type("nio").len(), 2);
        assert_eq!(reg.delete_type("nio"), 2);
        assert_eq!(reg.foreach_type("nio").len(), 0);
        assert!(reg.exists("c", "vm"));
    }
}
