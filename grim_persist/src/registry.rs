//! Dotted-path key/value store exposed to game scripts.
//!
//! The registry holds plain [`RuntimeValue`] data in two scopes and persists
//! through the value codec, never through the object-graph layer.

use serde_json::Value as JsonValue;

use crate::error::ValueCodecError;
use crate::value::{RuntimeValue, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryScope {
    /// Cleared when a new game starts.
    Session,
    /// Survives across sessions (options, unlocked extras).
    Persistent,
}

#[derive(Debug, Default, Clone)]
pub struct PersistentRegistry {
    session: RuntimeValue,
    persistent: RuntimeValue,
    dirty: bool,
}

/// Splits `a.b.c` into its segments, ignoring empty ones.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|segment| !segment.is_empty()).collect()
}

impl PersistentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self, scope: RegistryScope) -> &RuntimeValue {
        match scope {
            RegistryScope::Session => &self.session,
            RegistryScope::Persistent => &self.persistent,
        }
    }

    fn root_mut(&mut self, scope: RegistryScope) -> &mut RuntimeValue {
        match scope {
            RegistryScope::Session => &mut self.session,
            RegistryScope::Persistent => &mut self.persistent,
        }
    }

    pub fn get(&self, scope: RegistryScope, path: &str) -> &RuntimeValue {
        self.get_path(scope, &split_path(path))
    }

    /// Walks `segments` from the scope root. Missing levels read as Null.
    pub fn get_path(&self, scope: RegistryScope, segments: &[&str]) -> &RuntimeValue {
        segments
            .iter()
            .fold(self.root(scope), |node, segment| node.find_in_table(segment))
    }

    pub fn set(&mut self, scope: RegistryScope, path: &str, value: RuntimeValue) -> bool {
        self.set_path(scope, &split_path(path), value)
    }

    /// Stores `value` at `segments`, creating intermediate tables on the way.
    /// Fails when the path is empty or crosses a non-table value.
    pub fn set_path(
        &mut self,
        scope: RegistryScope,
        segments: &[&str],
        value: RuntimeValue,
    ) -> bool {
        let Some((last, parents)) = segments.split_last() else {
            log::warn!("[grim_persist] registry set called with an empty path");
            return false;
        };
        let mut node = self.root_mut(scope);
        for segment in parents {
            let Some(child) = node.table_entry(segment) else {
                return false;
            };
            node = child;
        }
        let stored = node.set_in_table(*last, value);
        if stored {
            self.touch(scope);
        }
        stored
    }

    fn touch(&mut self, scope: RegistryScope) {
        if scope == RegistryScope::Persistent {
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, scope: RegistryScope, path: &str) -> Option<RuntimeValue> {
        let segments = split_path(path);
        let (last, parents) = segments.split_last()?;
        let mut node = self.root_mut(scope);
        for segment in parents {
            node = node.find_in_table_mut(segment)?;
        }
        let removed = node.remove_from_table(last)?;
        self.touch(scope);
        Some(removed)
    }

    pub fn read_int(&self, scope: RegistryScope, path: &str) -> Option<i32> {
        match self.get(scope, path) {
            RuntimeValue::Int(value) => Some(*value),
            RuntimeValue::Float(value) => Some(*value as i32),
            _ => None,
        }
    }

    pub fn read_float(&self, scope: RegistryScope, path: &str) -> Option<f32> {
        match self.get(scope, path) {
            RuntimeValue::Float(value) => Some(*value),
            RuntimeValue::Int(value) => Some(*value as f32),
            _ => None,
        }
    }

    pub fn read_bool(&self, scope: RegistryScope, path: &str) -> Option<bool> {
        self.get(scope, path).as_bool()
    }

    pub fn read_string(&self, scope: RegistryScope, path: &str) -> Option<&str> {
        self.get(scope, path).as_str()
    }

    pub fn clear_session(&mut self) {
        self.session = RuntimeValue::Null;
    }

    /// True when the persistent scope changed since the last save or load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn save_scope(&self, scope: RegistryScope) -> Result<Vec<u8>, ValueCodecError> {
        self.root(scope).to_bytes()
    }

    /// Replaces a scope with a previously saved one. The scope is left
    /// untouched if the bytes do not decode to a table.
    pub fn load_scope(
        &mut self,
        scope: RegistryScope,
        bytes: &[u8],
    ) -> Result<(), ValueCodecError> {
        let loaded = RuntimeValue::from_bytes(bytes)?;
        match loaded.kind() {
            ValueKind::Table | ValueKind::Null => {}
            other => return Err(ValueCodecError::UnexpectedRoot(other)),
        }
        match scope {
            RegistryScope::Session => self.session = loaded,
            RegistryScope::Persistent => {
                self.persistent = loaded;
                self.dirty = false;
            }
        }
        Ok(())
    }

    /// Moves a scope's contents out, leaving it empty.
    pub fn take_scope(&mut self, scope: RegistryScope) -> RuntimeValue {
        let taken = std::mem::take(self.root_mut(scope));
        if !taken.is_null() {
            self.touch(scope);
        }
        taken
    }

    /// Installs an already decoded scope and returns the previous one.
    pub fn replace_scope(&mut self, scope: RegistryScope, value: RuntimeValue) -> RuntimeValue {
        let previous = std::mem::replace(self.root_mut(scope), value);
        self.touch(scope);
        previous
    }

    pub fn to_json(&self, scope: RegistryScope) -> Result<JsonValue, ValueCodecError> {
        match self.root(scope) {
            RuntimeValue::Null => Ok(JsonValue::Object(Default::default())),
            root => root.to_json(),
        }
    }

    /// Copies every top-level member of a JSON object into the scope.
    pub fn merge_json(
        &mut self,
        scope: RegistryScope,
        json: &JsonValue,
    ) -> Result<(), ValueCodecError> {
        let entries = match RuntimeValue::from_json(json)? {
            RuntimeValue::Table(entries) => entries,
            other => return Err(ValueCodecError::UnexpectedRoot(other.kind())),
        };
        let root = self.root_mut(scope);
        let mut stored = false;
        for (key, value) in entries {
            stored |= root.set_in_table(key, value);
        }
        if stored {
            self.touch(scope);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SESSION: RegistryScope = RegistryScope::Session;
    const PERSISTENT: RegistryScope = RegistryScope::Persistent;

    #[test]
    fn dotted_set_creates_nested_tables() {
        let mut registry = PersistentRegistry::new();
        assert!(registry.set_path(SESSION, &["a", "b", "c"], RuntimeValue::Int(42)));
        assert_eq!(registry.get(SESSION, "a.b.c").as_int(), Some(42));

        let parent = registry.get_path(SESSION, &["a", "b"]);
        assert_eq!(parent.kind(), ValueKind::Table);
        assert_eq!(parent.table_entries().len(), 1);
        assert_eq!(parent.table_entries()[0].0, "c");
    }

    #[test]
    fn missing_levels_read_as_null() {
        let registry = PersistentRegistry::new();
        assert!(registry.get(SESSION, "nobody.home").is_null());
        assert_eq!(registry.read_int(SESSION, "nobody.home"), None);
    }

    #[test]
    fn set_through_scalar_fails_and_leaves_value() {
        let mut registry = PersistentRegistry::new();
        registry.set(SESSION, "hp", RuntimeValue::Int(10));
        assert!(!registry.set(SESSION, "hp.max", RuntimeValue::Int(20)));
        assert_eq!(registry.read_int(SESSION, "hp"), Some(10));
        assert!(!registry.set(SESSION, "", RuntimeValue::Int(1)));
    }

    #[test]
    fn failed_persistent_set_stays_clean() {
        let mut registry = PersistentRegistry::new();
        registry.set(PERSISTENT, "hp", RuntimeValue::Int(10));
        registry.mark_clean();
        assert!(!registry.set(PERSISTENT, "hp.max", RuntimeValue::Int(20)));
        assert!(!registry.set(PERSISTENT, "..", RuntimeValue::Int(1)));
        assert!(!registry.is_dirty());
        assert!(registry.set(PERSISTENT, "hp", RuntimeValue::Int(11)));
        assert!(registry.is_dirty());
    }

    #[test]
    fn empty_json_merge_stays_clean() {
        let mut registry = PersistentRegistry::new();
        registry.merge_json(PERSISTENT, &json!({})).unwrap();
        assert!(!registry.is_dirty());
        registry.merge_json(PERSISTENT, &json!({"volume": 1})).unwrap();
        assert!(registry.is_dirty());
    }

    #[test]
    fn scopes_move_between_registries() {
        let mut staged = PersistentRegistry::new();
        staged.set(SESSION, "chapter", RuntimeValue::Int(3));
        let mut live = PersistentRegistry::new();
        live.set(SESSION, "chapter", RuntimeValue::Int(1));

        let previous = live.replace_scope(SESSION, staged.take_scope(SESSION));
        assert_eq!(previous.find_in_table("chapter").as_int(), Some(1));
        assert_eq!(live.read_int(SESSION, "chapter"), Some(3));
        assert!(staged.get(SESSION, "chapter").is_null());
        assert!(!live.is_dirty());
    }

    #[test]
    fn scopes_are_independent() {
        let mut registry = PersistentRegistry::new();
        registry.set(SESSION, "chapter", RuntimeValue::Int(2));
        assert!(!registry.is_dirty());
        registry.set(PERSISTENT, "options.subtitles", RuntimeValue::Bool(true));
        assert!(registry.is_dirty());

        assert!(registry.get(PERSISTENT, "chapter").is_null());
        registry.clear_session();
        assert!(registry.get(SESSION, "chapter").is_null());
        assert_eq!(registry.read_bool(PERSISTENT, "options.subtitles"), Some(true));
    }

    #[test]
    fn saved_scope_reloads_into_fresh_registry() {
        let mut source = RuntimeValue::create_table();
        source.set_in_table("hp", RuntimeValue::Int(10));
        source.set_in_table("name", RuntimeValue::from("foo"));
        source.set_in_table(
            "tags",
            RuntimeValue::Array(vec![RuntimeValue::from("a"), RuntimeValue::from("b")]),
        );
        let bytes = source.to_bytes().unwrap();

        let mut registry = PersistentRegistry::new();
        registry.load_scope(SESSION, &bytes).unwrap();
        assert_eq!(registry.read_int(SESSION, "hp"), Some(10));
        assert_eq!(registry.read_string(SESSION, "name"), Some("foo"));
        let tags = registry.get(SESSION, "tags");
        assert_eq!(tags.kind(), ValueKind::Array);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get_at(0).as_str(), Some("a"));
        assert_eq!(tags.get_at(1).as_str(), Some("b"));
    }

    #[test]
    fn load_rejects_non_table_root() {
        let mut registry = PersistentRegistry::new();
        registry.set(PERSISTENT, "keep", RuntimeValue::Int(1));
        let bytes = RuntimeValue::Int(5).to_bytes().unwrap();
        assert!(matches!(
            registry.load_scope(PERSISTENT, &bytes),
            Err(ValueCodecError::UnexpectedRoot(ValueKind::Int))
        ));
        assert_eq!(registry.read_int(PERSISTENT, "keep"), Some(1));
    }

    #[test]
    fn remove_marks_persistent_dirty() {
        let mut registry = PersistentRegistry::new();
        registry.set(PERSISTENT, "extras.concept_art", RuntimeValue::Bool(true));
        registry.mark_clean();
        assert!(registry.remove(PERSISTENT, "extras.missing").is_none());
        assert!(!registry.is_dirty());
        let removed = registry.remove(PERSISTENT, "extras.concept_art");
        assert_eq!(removed.and_then(|value| value.as_bool()), Some(true));
        assert!(registry.is_dirty());
    }

    #[test]
    fn json_merge_and_export() {
        let mut registry = PersistentRegistry::new();
        registry
            .merge_json(PERSISTENT, &json!({"volume": 0.5, "lastSave": 3}))
            .unwrap();
        assert_eq!(registry.read_float(PERSISTENT, "volume"), Some(0.5));
        assert_eq!(registry.read_int(PERSISTENT, "lastSave"), Some(3));
        assert_eq!(
            registry.to_json(PERSISTENT).unwrap(),
            json!({"volume": 0.5, "lastSave": 3})
        );
        assert!(registry.merge_json(SESSION, &json!([1, 2])).is_err());
        assert_eq!(registry.to_json(SESSION).unwrap(), json!({}));
    }
}
