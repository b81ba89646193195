// MIT License - Copyright (c) 2026 Peter Wright
// Typed containers of panel objects with change-set emission

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::codec::value::{Record, Value};
use crate::error::{ParadoxError, Result};

/// Container names, one per kind of panel object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Partition,
    Zone,
    Pgm,
    User,
    Door,
    Module,
    System,
}

impl Container {
    pub const ALL: [Container; 7] = [
        Container::Partition,
        Container::Zone,
        Container::Pgm,
        Container::User,
        Container::Door,
        Container::Module,
        Container::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Partition => "partition",
            Container::Zone => "zone",
            Container::Pgm => "pgm",
            Container::User => "user",
            Container::Door => "door",
            Container::Module => "module",
            Container::System => "system",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Fields that only an inventory download may rewrite.
    fn immutable_fields(&self) -> &'static [&'static str] {
        match self {
            Container::Zone => &["partition", "definition"],
            _ => &[],
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object key: the panel's 1-based index, or a name for system entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Key {
    Index(u32),
    Name(String),
}

impl Key {
    pub fn index(&self) -> Option<u32> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Name(n) => f.write_str(n),
        }
    }
}

impl From<u32> for Key {
    fn from(i: u32) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(n: &str) -> Self {
        Key::Name(n.to_string())
    }
}

/// A shallow update for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub container: Container,
    pub key: Key,
    pub fields: Record,
}

impl Patch {
    pub fn new(container: Container, key: impl Into<Key>, fields: Record) -> Self {
        Self {
            container,
            key: key.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<Value>,
    pub new: Value,
}

/// Fields of one object that took a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub container: Container,
    pub key: Key,
    pub changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }
}

/// In-memory model of the panel.
///
/// Owned by the coordinator; other tasks read it through the coordinator's lock.
#[derive(Debug, Default)]
pub struct Store {
    containers: BTreeMap<Container, BTreeMap<Key, Record>>,
    definitions_locked: bool,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into the object, creating it if needed.
    ///
    /// Returns the fields whose value differs from the stored one, or `None`
    /// when the update is idempotent.
    pub fn update_container_object(
        &mut self,
        container: Container,
        key: impl Into<Key>,
        patch: Record,
    ) -> Result<Option<ChangeSet>> {
        let key = key.into();
        let objects = self.containers.entry(container).or_default();
        let current = objects.get(&key);

        let mut changes = Vec::new();
        for (field, new) in &patch {
            let old = current.and_then(|obj| obj.get(field));
            if old == Some(new) {
                continue;
            }
            if self.definitions_locked
                && old.is_some()
                && container.immutable_fields().contains(&field.as_str())
            {
                return Err(ParadoxError::InvariantViolation {
                    container: container.to_string(),
                    key: key.to_string(),
                    field: field.clone(),
                });
            }
            changes.push(FieldChange {
                field: field.clone(),
                old: old.cloned(),
                new: new.clone(),
            });
        }

        let object = objects.entry(key.clone()).or_default();
        object.extend(patch);

        if changes.is_empty() {
            return Ok(None);
        }
        Ok(Some(ChangeSet {
            container,
            key,
            changes,
        }))
    }

    pub fn apply(&mut self, patch: Patch) -> Result<Option<ChangeSet>> {
        self.update_container_object(patch.container, patch.key, patch.fields)
    }

    pub fn get(&self, container: Container, key: &Key) -> Option<&Record> {
        self.containers.get(&container).and_then(|c| c.get(key))
    }

    pub fn keys(&self, container: Container) -> Vec<Key> {
        self.containers
            .get(&container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn objects(&self, container: Container) -> impl Iterator<Item = (&Key, &Record)> {
        self.containers.get(&container).into_iter().flat_map(|c| c.iter())
    }

    /// The object's label, if the inventory loaded one.
    pub fn label(&self, container: Container, index: u32) -> Option<&str> {
        self.get(container, &Key::Index(index))
            .and_then(|obj| obj.get("label"))
            .and_then(Value::as_str)
    }

    /// Freeze definition fields once inventory completes.
    pub fn lock_definitions(&mut self) {
        self.definitions_locked = true;
    }

    /// Allow the next inventory download to rewrite definition fields.
    pub fn unlock_definitions(&mut self) {
        self.definitions_locked = false;
    }

    pub fn clear(&mut self) {
        self.containers.clear();
        self.definitions_locked = false;
    }

    pub fn is_empty(&self) -> bool {
        self.containers.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::value::record;

    #[test]
    fn test_update_emits_only_changed_fields() {
        let mut store = Store::new();
        let first = store
            .update_container_object(Container::Zone, 5, record([("open", true), ("tamper", false)]))
            .unwrap()
            .unwrap();
        assert_eq!(first.changes.len(), 2);
        assert_eq!(first.get("open").unwrap().old, None);

        let second = store
            .update_container_object(Container::Zone, 5, record([("open", false), ("tamper", false)]))
            .unwrap()
            .unwrap();
        assert_eq!(second.changes.len(), 1);
        let open = second.get("open").unwrap();
        assert_eq!(open.old, Some(Value::Bool(true)));
        assert_eq!(open.new, Value::Bool(false));
    }

    #[test]
    fn test_idempotent_update_is_silent() {
        let mut store = Store::new();
        store
            .update_container_object(Container::Pgm, 1, record([("on", true)]))
            .unwrap();
        let again = store
            .update_container_object(Container::Pgm, 1, record([("on", true)]))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_shallow_merge_keeps_other_fields() {
        let mut store = Store::new();
        store
            .update_container_object(
                Container::Zone,
                1,
                record([("label", Value::from("Door")), ("open", Value::Bool(false))]),
            )
            .unwrap();
        store
            .update_container_object(Container::Zone, 1, record([("open", true)]))
            .unwrap();
        let zone = store.get(Container::Zone, &Key::Index(1)).unwrap();
        assert_eq!(zone["label"], Value::from("Door"));
        assert_eq!(zone["open"], Value::Bool(true));
        assert_eq!(store.label(Container::Zone, 1), Some("Door"));
    }

    #[test]
    fn test_locked_definition_rejects_partition_change() {
        let mut store = Store::new();
        store
            .update_container_object(Container::Zone, 3, record([("partition", 1u8)]))
            .unwrap();
        store.lock_definitions();
        let err = store
            .update_container_object(
                Container::Zone,
                3,
                record([("partition", Value::Int(2)), ("open", Value::Bool(true))]),
            )
            .unwrap_err();
        assert!(matches!(err, ParadoxError::InvariantViolation { .. }));
        let zone = store.get(Container::Zone, &Key::Index(3)).unwrap();
        assert_eq!(zone["partition"], Value::Int(1));
        assert!(!zone.contains_key("open"));

        store.unlock_definitions();
        assert!(store
            .update_container_object(Container::Zone, 3, record([("partition", 2u8)]))
            .is_ok());
    }

    #[test]
    fn test_keys_in_index_order() {
        let mut store = Store::new();
        for i in [3u32, 1, 2] {
            store
                .update_container_object(Container::Partition, i, record([("arm", false)]))
                .unwrap();
        }
        assert_eq!(
            store.keys(Container::Partition),
            vec![Key::Index(1), Key::Index(2), Key::Index(3)]
        );
        assert!(store.keys(Container::Door).is_empty());
    }

    #[test]
    fn test_container_names() {
        for c in Container::ALL {
            assert_eq!(Container::from_name(c.as_str()), Some(c));
        }
        assert_eq!(Container::from_name("bus"), None);
    }
}
