//! The patch record registry.
//!
//! One [`PatchRecord`] is kept per installed replacement method, keyed by
//! the replacement's [`MethodId`]. Records are written while patches are
//! applied at start-up and only read afterwards; [`PatchRegistry::freeze`]
//! marks that transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::PatchError;
use crate::object::{Method, MethodId};

/// What a replacement method replaced.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// Qualified name of the patched class or module.
    pub target: String,
    /// Attribute name on the target.
    pub name: String,
    /// The implementation that was in place before the patch.
    pub previous: Method,
}

/// Registry of replaced implementations.
#[derive(Debug, Default)]
pub struct PatchRegistry {
    records: RwLock<HashMap<MethodId, PatchRecord>>,
    frozen: AtomicBool,
}

impl PatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records what `replacement` replaces.
    ///
    /// Returns `Ok(false)` without changing anything when a record for this
    /// replacement already exists, so the first recorded original is kept.
    pub fn record(&self, replacement: &Method, record: PatchRecord) -> Result<bool, PatchError> {
        self.ensure_writable(&record.target, &record.name)?;
        let mut records = self.records.write().expect("patch registry lock poisoned");
        if let Some(existing) = records.get(&replacement.id()) {
            tracing::debug!(
                "{} already records {} as the previous {}.{}",
                replacement,
                existing.previous,
                existing.target,
                existing.name
            );
            return Ok(false);
        }
        records.insert(replacement.id(), record);
        Ok(true)
    }

    pub fn get(&self, id: MethodId) -> Option<PatchRecord> {
        self.records
            .read()
            .expect("patch registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// The method replaced by the method with identity `id`.
    pub fn previous(&self, id: MethodId) -> Option<Method> {
        self.get(id).map(|record| record.previous)
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("patch registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ends the start-up window. Further patching fails with
    /// [`PatchError::Frozen`].
    pub fn freeze(&self) {
        if !self.frozen.swap(true, Ordering::SeqCst) {
            tracing::info!("Patch registry frozen with {} records", self.len());
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_writable(&self, target: &str, name: &str) -> Result<(), PatchError> {
        if self.is_frozen() {
            tracing::warn!("Rejected patch of {target}.{name} after start-up");
            return Err(PatchError::Frozen {
                target: target.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn method(value: &'static str) -> Method {
        Method::instance("get", move |_, _| Ok(json!(value)))
    }

    fn record(previous: &Method) -> PatchRecord {
        PatchRecord {
            target: "app.Thing".into(),
            name: "get".into(),
            previous: previous.clone(),
        }
    }

    #[test]
    fn test_first_record_wins() {
        let registry = PatchRegistry::new();
        let original = method("original");
        let intermediate = method("intermediate");
        let replacement = method("replacement");

        assert!(registry.record(&replacement, record(&original)).unwrap());
        assert!(!registry.record(&replacement, record(&intermediate)).unwrap());
        assert_eq!(registry.previous(replacement.id()).unwrap().id(), original.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_frozen_registry_rejects_writes() {
        let registry = PatchRegistry::new();
        registry.freeze();
        assert!(registry.is_frozen());
        let err = registry
            .record(&method("a"), record(&method("b")))
            .unwrap_err();
        assert!(matches!(err, PatchError::Frozen { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_reads_after_freeze() {
        let registry = std::sync::Arc::new(PatchRegistry::new());
        let original = method("original");
        let replacement = method("replacement");
        registry.record(&replacement, record(&original)).unwrap();
        registry.freeze();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let id = replacement.id();
                std::thread::spawn(move || registry.previous(id).map(|m| m.id()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(original.id()));
        }
    }
}
