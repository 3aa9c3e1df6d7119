// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A process-wide, name-indexed object table with reference counts, the single path by which the
//! CLI and hypervisor protocol server attach, detach, and look up NIOs, bridges, switches, and
//! VMs. Modeled on the teacher's single-mutex, short-critical-section device maps: every mutation
//! takes one `Mutex` and releases it before calling back into user code.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use remain::sorted;
use thiserror::Error as ThisError;

/// The kind of object a registry entry holds. The registry does not interpret the payload itself;
/// callers use `Registry::find` with the type they expect and get a downcast failure if the
/// stored kind doesn't match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Nio,
    Bridge,
    Switch,
    Vm,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Nio => "nio",
            ObjectType::Bridge => "bridge",
            ObjectType::Switch => "switch",
            ObjectType::Vm => "vm",
        };
        write!(f, "{}", s)
    }
}

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// An object with this `(type, name)` is already registered.
    #[error("{0} object named '{1}' already exists")]
    AlreadyExists(ObjectType, String),
    /// The stored object's concrete type didn't match what the caller asked for.
    #[error("{0} object named '{1}' has an unexpected concrete type")]
    BadDowncast(ObjectType, String),
    /// No object with this `(type, name)` is registered.
    #[error("no {0} object named '{1}'")]
    NotFound(ObjectType, String),
}

pub type Result<T> = std::result::Result<T, Error>;

struct Entry {
    obj: Arc<dyn Any + Send + Sync>,
    refcount: usize,
}

/// The registry itself. Cheap to clone (an `Arc` around the lock), so every component that needs
/// to attach/detach objects can hold its own handle.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<(ObjectType, String), Entry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers `obj` under `(kind, name)` with an initial refcount of 1. Fails if the name is
    /// already taken for that kind.
    pub fn add<T: Any + Send + Sync>(&self, kind: ObjectType, name: &str, obj: T) -> Result<()> {
        let mut map = self.inner.lock().unwrap();
        let key = (kind, name.to_string());
        if map.contains_key(&key) {
            return Err(Error::AlreadyExists(kind, name.to_string()));
        }
        map.insert(
            key,
            Entry {
                obj: Arc::new(obj),
                refcount: 1,
            },
        );
        Ok(())
    }

    /// Returns whether `(kind, name)` is registered, without touching the refcount.
    pub fn exists(&self, kind: ObjectType, name: &str) -> bool {
        let map = self.inner.lock().unwrap();
        map.contains_key(&(kind, name.to_string()))
    }

    /// Looks up `(kind, name)`, incrementing its refcount, and downcasts it to `T`.
    pub fn find<T: Any + Send + Sync + Clone>(&self, kind: ObjectType, name: &str) -> Result<T> {
        let mut map = self.inner.lock().unwrap();
        let key = (kind, name.to_string());
        let entry = map
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(kind, name.to_string()))?;
        let obj = entry
            .obj
            .downcast_ref::<T>()
            .ok_or_else(|| Error::BadDowncast(kind, name.to_string()))?
            .clone();
        entry.refcount += 1;
        Ok(obj)
    }

    /// Decrements the refcount of `(kind, name)` without removing it; the caller is expected to
    /// have matched this with an earlier `find` or the initial `add`.
    pub fn unref(&self, kind: ObjectType, name: &str) -> Result<usize> {
        let mut map = self.inner.lock().unwrap();
        let key = (kind, name.to_string());
        let entry = map
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(kind, name.to_string()))?;
        entry.refcount = entry.refcount.saturating_sub(1);
        Ok(entry.refcount)
    }

    /// Unconditionally removes `(kind, name)` regardless of refcount.
    pub fn delete(&self, kind: ObjectType, name: &str) -> Result<()> {
        let mut map = self.inner.lock().unwrap();
        map.remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or(Error::NotFound(kind, name.to_string()))
    }

    /// Renames `(kind, old)` to `(kind, new)`. Transactional: fails, leaving the old entry
    /// untouched, if `new` is already taken.
    pub fn rename(&self, kind: ObjectType, old: &str, new: &str) -> Result<()> {
        let mut map = self.inner.lock().unwrap();
        let new_key = (kind, new.to_string());
        if map.contains_key(&new_key) {
            return Err(Error::AlreadyExists(kind, new.to_string()));
        }
        let old_key = (kind, old.to_string());
        let entry = map
            .remove(&old_key)
            .ok_or_else(|| Error::NotFound(kind, old.to_string()))?;
        map.insert(new_key, entry);
        Ok(())
    }

    /// If `(kind, name)`'s refcount is at most `max`, removes it and calls `destroy_cb` with the
    /// name, after releasing the lock. Returns whether the object was removed.
    pub fn exec_if_refcount_le(
        &self,
        kind: ObjectType,
        name: &str,
        max: usize,
        destroy_cb: impl FnOnce(&str),
    ) -> Result<bool> {
        let removed = {
            let mut map = self.inner.lock().unwrap();
            let key = (kind, name.to_string());
            let refcount = map
                .get(&key)
                .ok_or_else(|| Error::NotFound(kind, name.to_string()))?
                .refcount;
            if refcount <= max {
                map.remove(&key);
                true
            } else {
                false
            }
        };
        if removed {
            destroy_cb(name);
        }
        Ok(removed)
    }

    /// Calls `cb` once per registered name of `kind`, in unspecified order. The lock is released
    /// before any callback runs, so `cb` may itself call back into the registry.
    pub fn foreach_type(&self, kind: ObjectType, mut cb: impl FnMut(&str)) {
        let names: Vec<String> = {
            let map = self.inner.lock().unwrap();
            map.keys()
                .filter(|(k, _)| *k == kind)
                .map(|(_, name)| name.clone())
                .collect()
        };
        for name in names {
            cb(&name);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_duplicate_name_fails() {
        let reg = Registry::new();
        reg.add(ObjectType::Nio, "eth0", 1u32).unwrap();
        assert!(matches!(
            reg.add(ObjectType::Nio, "eth0", 2u32),
            Err(Error::AlreadyExists(ObjectType::Nio, _))
        ));
    }

    #[test]
    fn find_increments_refcount_and_downcasts() {
        let reg = Registry::new();
        reg.add(ObjectType::Vm, "r1", 42u32).unwrap();
        let v: u32 = reg.find(ObjectType::Vm, "r1").unwrap();
        assert_eq!(v, 42);
        assert_eq!(reg.unref(ObjectType::Vm, "r1").unwrap(), 1);
    }

    #[test]
    fn rename_fails_on_collision_and_leaves_original_intact() {
        let reg = Registry::new();
        reg.add(ObjectType::Switch, "sw0", "a".to_string()).unwrap();
        reg.add(ObjectType::Switch, "sw1", "b".to_string()).unwrap();
        assert!(matches!(
            reg.rename(ObjectType::Switch, "sw0", "sw1"),
            Err(Error::AlreadyExists(ObjectType::Switch, _))
        ));
        assert!(reg.exists(ObjectType::Switch, "sw0"));
    }

    #[test]
    fn exec_if_refcount_le_only_destroys_when_unreferenced() {
        let reg = Registry::new();
        reg.add(ObjectType::Bridge, "br0", 1u32).unwrap();
        let _held: u32 = reg.find(ObjectType::Bridge, "br0").unwrap();
        let mut destroyed = false;
        reg.exec_if_refcount_le(ObjectType::Bridge, "br0", 1, |_| destroyed = true)
            .unwrap();
        assert!(!destroyed);
        assert!(reg.exists(ObjectType::Bridge, "br0"));

        reg.unref(ObjectType::Bridge, "br0").unwrap();
        reg.exec_if_refcount_le(ObjectType::Bridge, "br0", 1, |_| destroyed = true)
            .unwrap();
        assert!(destroyed);
        assert!(!reg.exists(ObjectType::Bridge, "br0"));
    }

    #[test]
    fn foreach_type_visits_only_matching_kind() {
        let reg = Registry::new();
        reg.add(ObjectType::Nio, "n0", 1u32).unwrap();
        reg.add(ObjectType::Nio, "n1", 2u32).unwrap();
        reg.add(ObjectType::Vm, "v0", 3u32).unwrap();
        let mut seen = Vec::new();
        reg.foreach_type(ObjectType::Nio, |name| seen.push(name.to_string()));
        seen.sort();
        assert_eq!(seen, vec!["n0".to_string(), "n1".to_string()]);
    }
}
