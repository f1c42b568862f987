use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use inbound_id::ExecutableId;
use inbound_types::ProcessScope;

use crate::registered::RegisteredExecutable;

#[derive(Default)]
struct StoreInner {
    executables: HashMap<ExecutableId, RegisteredExecutable>,
    by_scope: HashMap<ProcessScope, BTreeSet<ExecutableId>>,
}

impl StoreInner {
    fn insert(
        &mut self,
        id: ExecutableId,
        entry: RegisteredExecutable,
    ) -> Option<RegisteredExecutable> {
        let scope = entry.scope();
        let previous = self.executables.insert(id, entry);
        if let Some(prev_scope) = previous.as_ref().and_then(RegisteredExecutable::scope) {
            if Some(&prev_scope) != scope.as_ref() {
                self.unindex(&prev_scope, &id);
            }
        }
        if let Some(scope) = scope {
            self.by_scope.entry(scope).or_default().insert(id);
        }
        previous
    }

    fn take(&mut self, id: &ExecutableId) -> Option<RegisteredExecutable> {
        let previous = self.executables.remove(id)?;
        if let Some(scope) = previous.scope() {
            self.unindex(&scope, id);
        }
        Some(previous)
    }

    fn unindex(&mut self, scope: &ProcessScope, id: &ExecutableId) {
        if let Some(ids) = self.by_scope.get_mut(scope) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_scope.remove(scope);
            }
        }
    }
}

/// Identity to lifecycle-state map with a per-scope index.
///
/// All mutations happen under one write lock, so readers see either the old
/// or the new entry for an identity.
#[derive(Default)]
pub struct ExecutableStateStore {
    inner: RwLock<StoreInner>,
}

impl ExecutableStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &ExecutableId) -> Option<RegisteredExecutable> {
        self.read().executables.get(id).cloned()
    }

    /// Insert or overwrite; returns the previous entry.
    pub fn put(
        &self,
        id: ExecutableId,
        entry: RegisteredExecutable,
    ) -> Option<RegisteredExecutable> {
        self.write().insert(id, entry)
    }

    pub fn put_all(&self, entries: impl IntoIterator<Item = (ExecutableId, RegisteredExecutable)>) {
        let mut inner = self.write();
        for (id, entry) in entries {
            inner.insert(id, entry);
        }
    }

    /// Overwrite only if `id` is present.
    pub fn replace(
        &self,
        id: ExecutableId,
        entry: RegisteredExecutable,
    ) -> Option<RegisteredExecutable> {
        let mut inner = self.write();
        if !inner.executables.contains_key(&id) {
            return None;
        }
        inner.insert(id, entry)
    }

    /// Overwrite only if the current entry satisfies `expected`; atomic with respect to
    /// other writers.
    pub fn replace_if(
        &self,
        id: ExecutableId,
        expected: impl FnOnce(&RegisteredExecutable) -> bool,
        entry: RegisteredExecutable,
    ) -> bool {
        let mut inner = self.write();
        match inner.executables.get(&id) {
            Some(current) if expected(current) => {
                inner.insert(id, entry);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, id: &ExecutableId) -> Option<RegisteredExecutable> {
        self.write().take(id)
    }

    pub fn get_all(&self) -> Vec<RegisteredExecutable> {
        self.read().executables.values().cloned().collect()
    }

    pub fn ids_for_scope(&self, scope: &ProcessScope) -> BTreeSet<ExecutableId> {
        self.read().by_scope.get(scope).cloned().unwrap_or_default()
    }

    /// Snapshot of every entry owned by `scope`.
    pub fn scope_snapshot(
        &self,
        scope: &ProcessScope,
    ) -> HashMap<ExecutableId, RegisteredExecutable> {
        let inner = self.read();
        inner
            .by_scope
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.executables.get(id).map(|entry| (*id, entry.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().executables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().executables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inbound_types::{
        CorrelationPoint, Declaration, DeclarationError, InvalidDeclaration, ProcessElement,
        RawElement, keywords,
    };
    use std::collections::BTreeMap;

    fn invalid(dedup: &str, tenant: &str, process: &str) -> RegisteredExecutable {
        let mut props = BTreeMap::new();
        props.insert(keywords::INBOUND_TYPE.to_string(), "webhook".to_string());
        let element = RawElement::new(
            props,
            CorrelationPoint::StartEvent,
            ProcessElement::new(process, 1, 1, "start", tenant),
        );
        RegisteredExecutable::InvalidDefinition {
            declaration: InvalidDeclaration {
                id: ExecutableId::from_dedup_id(dedup),
                deduplication_id: dedup.to_string(),
                elements: vec![element],
                error: DeclarationError::TypeMismatch,
            },
        }
    }

    fn failed(dedup: &str, tenant: &str, process: &str) -> RegisteredExecutable {
        let RegisteredExecutable::InvalidDefinition { declaration } =
            invalid(dedup, tenant, process)
        else {
            unreachable!()
        };
        RegisteredExecutable::FailedToActivate {
            declaration: Declaration::Invalid(declaration),
            reason: "boom".into(),
        }
    }

    #[test]
    fn scope_index_tracks_puts_and_removes() {
        let store = ExecutableStateStore::new();
        let a = ExecutableId::from_dedup_id("a");
        let b = ExecutableId::from_dedup_id("b");
        let c = ExecutableId::from_dedup_id("c");
        store.put(a, invalid("a", "t1", "p1"));
        store.put_all([(b, invalid("b", "t1", "p1")), (c, invalid("c", "t1", "p2"))]);

        let p1 = ProcessScope::new("t1", "p1");
        assert_eq!(store.ids_for_scope(&p1), BTreeSet::from([a, b]));
        assert_eq!(store.ids_for_scope(&ProcessScope::new("t2", "p1")), BTreeSet::new());
        assert_eq!(store.len(), 3);

        assert!(store.remove(&a).is_some());
        assert_eq!(store.ids_for_scope(&p1), BTreeSet::from([b]));
        assert_eq!(store.scope_snapshot(&p1).len(), 1);
        assert!(store.remove(&a).is_none());
    }

    #[test]
    fn replace_requires_presence_and_predicate() {
        let store = ExecutableStateStore::new();
        let a = ExecutableId::from_dedup_id("a");
        assert!(store.replace(a, invalid("a", "t1", "p1")).is_none());
        assert!(store.get(&a).is_none());

        store.put(a, invalid("a", "t1", "p1"));
        let swapped = store.replace_if(
            a,
            |current| matches!(current, RegisteredExecutable::FailedToActivate { .. }),
            failed("a", "t1", "p1"),
        );
        assert!(!swapped);
        let swapped = store.replace_if(
            a,
            |current| matches!(current, RegisteredExecutable::InvalidDefinition { .. }),
            failed("a", "t1", "p1"),
        );
        assert!(swapped);
        assert!(matches!(
            store.get(&a),
            Some(RegisteredExecutable::FailedToActivate { .. })
        ));
        assert!(store.replace(a, invalid("a", "t1", "p1")).is_some());
    }
}
