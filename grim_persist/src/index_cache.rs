//! Name lookups for code-defined objects.
//!
//! Compiled classes and functions are not data: a save refers to them by
//! name and the loader resolves those names against whatever program is
//! running now. The host fills these caches; the graph layer only queries.

use std::collections::HashMap;

use crate::runtime::{ClassRef, ClosureRef, NativeClosureRef, TableRef, Value};

/// Stable per-object identity used for the reverse lookup.
pub trait Identity {
    fn identity(&self) -> usize;
}

impl Identity for ClassRef {
    fn identity(&self) -> usize {
        ClassRef::identity(self)
    }
}

/// Either flavour of callable a script can hold.
#[derive(Debug, Clone)]
pub enum FunctionRef {
    Closure(ClosureRef),
    Native(NativeClosureRef),
}

impl FunctionRef {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Closure(closure) => Some(FunctionRef::Closure(closure.clone())),
            Value::NativeClosure(native) => Some(FunctionRef::Native(native.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            FunctionRef::Closure(closure) => Value::Closure(closure.clone()),
            FunctionRef::Native(native) => Value::NativeClosure(native.clone()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FunctionRef::Closure(closure) => closure.name(),
            FunctionRef::Native(native) => native.name(),
        }
    }

    pub fn identity(&self) -> usize {
        match self {
            FunctionRef::Closure(closure) => closure.identity(),
            FunctionRef::Native(native) => native.identity(),
        }
    }
}

impl Identity for FunctionRef {
    fn identity(&self) -> usize {
        FunctionRef::identity(self)
    }
}

/// Bidirectional name/handle map for one named kind.
#[derive(Debug, Clone)]
pub struct ObjectIndexCache<H> {
    by_name: HashMap<String, H>,
    by_identity: HashMap<usize, String>,
}

impl<H: Identity + Clone> ObjectIndexCache<H> {
    pub fn new() -> Self {
        ObjectIndexCache {
            by_name: HashMap::new(),
            by_identity: HashMap::new(),
        }
    }

    /// Registers `handle` under `name`, replacing any previous binding of
    /// either side.
    pub fn insert(&mut self, name: impl Into<String>, handle: H) {
        let name = name.into();
        if let Some(previous) = self.by_name.remove(&name) {
            self.by_identity.remove(&previous.identity());
        }
        if let Some(previous_name) = self.by_identity.insert(handle.identity(), name.clone()) {
            self.by_name.remove(&previous_name);
        }
        self.by_name.insert(name, handle);
    }

    pub fn handle_for(&self, name: &str) -> Option<H> {
        self.by_name.get(name).cloned()
    }

    pub fn name_for(&self, handle: &H) -> Option<&str> {
        self.by_identity
            .get(&handle.identity())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl<H: Identity + Clone> Default for ObjectIndexCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ClassIndexCache = ObjectIndexCache<ClassRef>;
pub type FunctionIndexCache = ObjectIndexCache<FunctionRef>;

/// The two caches a (de)serializer consults.
#[derive(Debug, Clone, Default)]
pub struct IndexCaches {
    pub classes: ClassIndexCache,
    pub functions: FunctionIndexCache,
}

impl IndexCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every string-keyed class and function found directly in
    /// `globals`, which is where a freshly loaded program defines them.
    pub fn from_globals(globals: &TableRef) -> Self {
        let mut caches = IndexCaches::new();
        for (key, value) in globals.snapshot() {
            let Some(name) = key.as_str() else {
                continue;
            };
            match &value {
                Value::Class(class) => caches.classes.insert(name, class.clone()),
                other => {
                    if let Some(function) = FunctionRef::from_value(other) {
                        caches.functions.insert(name, function);
                    }
                }
            }
        }
        log::debug!(
            "[grim_persist] indexed {} classes and {} functions from globals",
            caches.classes.len(),
            caches.functions.len()
        );
        caches
    }
}
