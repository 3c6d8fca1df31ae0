//! Reference-counted script objects and the handle API the graph layer
//! drives.
//!
//! Handles are cheap `Rc` clones; identity is pointer identity. Weak
//! references hold `std::rc::Weak` and read back as Null once nothing strong
//! keeps their target alive.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

/// Interned string contents.
pub type ScriptString = Rc<str>;

/// Signature of a host function exposed to scripts.
pub type NativeFn = fn(&[Value]) -> Value;

/// Runtime type tag of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Table,
    Instance,
    Class,
    Closure,
    NativeClosure,
    WeakRef,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i32),
    Float(f32),
    String(ScriptString),
    Array(ArrayRef),
    Table(TableRef),
    Instance(InstanceRef),
    Class(ClassRef),
    Closure(ClosureRef),
    NativeClosure(NativeClosureRef),
    Weak(WeakRef),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Integer(_) => TypeTag::Integer,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Table(_) => TypeTag::Table,
            Value::Instance(_) => TypeTag::Instance,
            Value::Class(_) => TypeTag::Class,
            Value::Closure(_) => TypeTag::Closure,
            Value::NativeClosure(_) => TypeTag::NativeClosure,
            Value::Weak(_) => TypeTag::WeakRef,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Raw equality: identity for reference kinds, content for strings,
    /// bit patterns for floats.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Table(a), Value::Table(b)) => a.ptr_eq(b),
            (Value::Instance(a), Value::Instance(b)) => a.ptr_eq(b),
            (Value::Class(a), Value::Class(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => a.ptr_eq(b),
            (Value::NativeClosure(a), Value::NativeClosure(b)) => a.ptr_eq(b),
            (Value::Weak(a), Value::Weak(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Converts a strong handle into a weak one. Scalars and strings have no
    /// separate lifetime and are returned unchanged.
    pub fn downgrade(&self) -> Value {
        let weak = match self {
            Value::Array(array) => WeakRef::Array(Rc::downgrade(&array.0)),
            Value::Table(table) => WeakRef::Table(Rc::downgrade(&table.0)),
            Value::Instance(instance) => WeakRef::Instance(Rc::downgrade(&instance.0)),
            Value::Class(class) => WeakRef::Class(Rc::downgrade(&class.0)),
            Value::Closure(closure) => WeakRef::Closure(Rc::downgrade(&closure.0)),
            Value::NativeClosure(native) => WeakRef::NativeClosure(Rc::downgrade(&native.0)),
            other => return other.clone(),
        };
        Value::Weak(weak)
    }

    /// Follows a weak reference; any other value is returned as is.
    pub fn resolve_weak(&self) -> Value {
        match self {
            Value::Weak(weak) => weak.upgrade(),
            other => other.clone(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(&**value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceRef> {
        match self {
            Value::Instance(instance) => Some(instance),
            _ => None,
        }
    }
}

// Handle Debug output never descends into contents so cyclic graphs print.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value:?}"),
            Value::String(value) => write!(f, "{:?}", &**value),
            Value::Array(array) => write!(f, "{array:?}"),
            Value::Table(table) => write!(f, "{table:?}"),
            Value::Instance(instance) => write!(f, "{instance:?}"),
            Value::Class(class) => write!(f, "{class:?}"),
            Value::Closure(closure) => write!(f, "{closure:?}"),
            Value::NativeClosure(native) => write!(f, "{native:?}"),
            Value::Weak(weak) => write!(f, "{weak:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<ArrayRef> for Value {
    fn from(array: ArrayRef) -> Self {
        Value::Array(array)
    }
}

impl From<TableRef> for Value {
    fn from(table: TableRef) -> Self {
        Value::Table(table)
    }
}

impl From<InstanceRef> for Value {
    fn from(instance: InstanceRef) -> Self {
        Value::Instance(instance)
    }
}

impl From<ClassRef> for Value {
    fn from(class: ClassRef) -> Self {
        Value::Class(class)
    }
}

impl From<ClosureRef> for Value {
    fn from(closure: ClosureRef) -> Self {
        Value::Closure(closure)
    }
}

impl From<NativeClosureRef> for Value {
    fn from(native: NativeClosureRef) -> Self {
        Value::NativeClosure(native)
    }
}

/// Insertion-ordered member storage shared by tables and instances.
#[derive(Clone, Default)]
pub struct Members {
    entries: Vec<(Value, Value)>,
}

impl Members {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(entry_key, _)| entry_key.raw_eq(key))
            .map(|(_, value)| value)
    }

    /// Overwrites or appends. Null keys are refused.
    pub fn set(&mut self, key: Value, value: Value) -> bool {
        if key.is_null() {
            return false;
        }
        match self
            .entries
            .iter_mut()
            .find(|(entry_key, _)| entry_key.raw_eq(&key))
        {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
        true
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let position = self
            .entries
            .iter()
            .position(|(entry_key, _)| entry_key.raw_eq(key))?;
        Some(self.entries.remove(position).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

#[derive(Clone)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    pub fn with_len(len: usize) -> Self {
        ArrayRef(Rc::new(RefCell::new(vec![Value::Null; len])))
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        ArrayRef(Rc::new(RefCell::new(values)))
    }

    pub fn get(&self, index: usize) -> Value {
        self.0.borrow().get(index).cloned().unwrap_or_default()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.0.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the element handles out so callers can walk without holding
    /// a borrow.
    pub fn snapshot(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array@{:#x}[{}]", self.identity(), self.len())
    }
}

#[derive(Clone)]
pub struct TableRef(Rc<RefCell<Members>>);

impl TableRef {
    pub fn new() -> Self {
        TableRef(Rc::new(RefCell::new(Members::default())))
    }

    pub fn get(&self, key: &Value) -> Value {
        self.0.borrow().get(key).cloned().unwrap_or_default()
    }

    /// Looks up a string key without interning it first.
    pub fn get_str(&self, key: &str) -> Value {
        self.0
            .borrow()
            .iter()
            .find(|(entry_key, _)| entry_key.as_str() == Some(key))
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, key: Value, value: Value) -> bool {
        self.0.borrow_mut().set(key, value)
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.0.borrow_mut().remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn members(&self) -> Ref<'_, Members> {
        self.0.borrow()
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.0.borrow().iter().cloned().collect()
    }

    pub fn ptr_eq(&self, other: &TableRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for TableRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table@{:#x}{{{}}}", self.identity(), self.len())
    }
}

/// Compiled class. `user_type` is zero for ordinary script classes and a
/// host-assigned tag for engine types with a dedicated codec.
pub struct Class {
    pub name: String,
    pub user_type: u32,
    pub defaults: Vec<(Value, Value)>,
}

#[derive(Clone)]
pub struct ClassRef(Rc<Class>);

impl ClassRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_user_type(name, 0, Vec::new())
    }

    pub fn with_user_type(
        name: impl Into<String>,
        user_type: u32,
        defaults: Vec<(Value, Value)>,
    ) -> Self {
        ClassRef(Rc::new(Class {
            name: name.into(),
            user_type,
            defaults,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn user_type(&self) -> u32 {
        self.0.user_type
    }

    pub fn defaults(&self) -> &[(Value, Value)] {
        &self.0.defaults
    }

    pub fn ptr_eq(&self, other: &ClassRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.0.name)
    }
}

pub struct Instance {
    class: ClassRef,
    members: Members,
}

#[derive(Clone)]
pub struct InstanceRef(Rc<RefCell<Instance>>);

impl InstanceRef {
    pub fn class(&self) -> ClassRef {
        self.0.borrow().class.clone()
    }

    pub fn get(&self, key: &Value) -> Value {
        self.0.borrow().members.get(key).cloned().unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.0
            .borrow()
            .members
            .iter()
            .find(|(entry_key, _)| entry_key.as_str() == Some(key))
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, key: Value, value: Value) -> bool {
        self.0.borrow_mut().members.set(key, value)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.0.borrow().members.iter().cloned().collect()
    }

    pub fn ptr_eq(&self, other: &InstanceRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let instance = self.0.borrow();
        write!(
            f,
            "instance@{:#x} of {}",
            self.identity(),
            instance.class.name()
        )
    }
}

/// Compiled script function. Only its identity and name matter here.
pub struct Closure {
    pub name: String,
    pub arity: u8,
}

#[derive(Clone)]
pub struct ClosureRef(Rc<Closure>);

impl ClosureRef {
    pub fn new(name: impl Into<String>, arity: u8) -> Self {
        ClosureRef(Rc::new(Closure {
            name: name.into(),
            arity,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn arity(&self) -> u8 {
        self.0.arity
    }

    pub fn ptr_eq(&self, other: &ClosureRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ClosureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "closure {}/{}", self.0.name, self.0.arity)
    }
}

pub struct NativeClosure {
    pub name: String,
    pub function: NativeFn,
}

#[derive(Clone)]
pub struct NativeClosureRef(Rc<NativeClosure>);

impl NativeClosureRef {
    pub fn new(name: impl Into<String>, function: NativeFn) -> Self {
        NativeClosureRef(Rc::new(NativeClosure {
            name: name.into(),
            function,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0.function)(args)
    }

    pub fn ptr_eq(&self, other: &NativeClosureRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for NativeClosureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native {}", self.0.name)
    }
}

#[derive(Clone)]
pub enum WeakRef {
    Array(Weak<RefCell<Vec<Value>>>),
    Table(Weak<RefCell<Members>>),
    Instance(Weak<RefCell<Instance>>),
    Class(Weak<Class>),
    Closure(Weak<Closure>),
    NativeClosure(Weak<NativeClosure>),
}

impl WeakRef {
    /// The referent as a strong value, or Null once it has been dropped.
    pub fn upgrade(&self) -> Value {
        let upgraded = match self {
            WeakRef::Array(weak) => weak.upgrade().map(|rc| Value::Array(ArrayRef(rc))),
            WeakRef::Table(weak) => weak.upgrade().map(|rc| Value::Table(TableRef(rc))),
            WeakRef::Instance(weak) => weak.upgrade().map(|rc| Value::Instance(InstanceRef(rc))),
            WeakRef::Class(weak) => weak.upgrade().map(|rc| Value::Class(ClassRef(rc))),
            WeakRef::Closure(weak) => weak.upgrade().map(|rc| Value::Closure(ClosureRef(rc))),
            WeakRef::NativeClosure(weak) => weak
                .upgrade()
                .map(|rc| Value::NativeClosure(NativeClosureRef(rc))),
        };
        upgraded.unwrap_or_default()
    }

    pub fn is_alive(&self) -> bool {
        !self.upgrade().is_null()
    }

    pub fn ptr_eq(&self, other: &WeakRef) -> bool {
        match (self, other) {
            (WeakRef::Array(a), WeakRef::Array(b)) => a.ptr_eq(b),
            (WeakRef::Table(a), WeakRef::Table(b)) => a.ptr_eq(b),
            (WeakRef::Instance(a), WeakRef::Instance(b)) => a.ptr_eq(b),
            (WeakRef::Class(a), WeakRef::Class(b)) => a.ptr_eq(b),
            (WeakRef::Closure(a), WeakRef::Closure(b)) => a.ptr_eq(b),
            (WeakRef::NativeClosure(a), WeakRef::NativeClosure(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Value::Null => f.write_str("weak(dead)"),
            target => write!(f, "weak({target:?})"),
        }
    }
}

/// Owns the global namespace and the string intern pool.
///
/// The pool holds a strong handle to every interned string until
/// [`ScriptRuntime::prune_strings`] drops the ones nothing else references.
pub struct ScriptRuntime {
    globals: TableRef,
    strings: HashSet<ScriptString>,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        ScriptRuntime {
            globals: TableRef::new(),
            strings: HashSet::new(),
        }
    }

    pub fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    pub fn intern(&mut self, value: &str) -> ScriptString {
        if let Some(existing) = self.strings.get(value) {
            return existing.clone();
        }
        let interned: ScriptString = Rc::from(value);
        self.strings.insert(interned.clone());
        interned
    }

    /// Drops pooled strings whose only holder is the pool. Returns how many
    /// were released.
    pub fn prune_strings(&mut self) -> usize {
        let before = self.strings.len();
        self.strings.retain(|interned| Rc::strong_count(interned) > 1);
        before - self.strings.len()
    }

    pub fn interned_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn string(&mut self, value: &str) -> Value {
        Value::String(self.intern(value))
    }

    pub fn create_array(&self, len: usize) -> ArrayRef {
        ArrayRef::with_len(len)
    }

    pub fn create_table(&self) -> TableRef {
        TableRef::new()
    }

    /// Creates an instance carrying a copy of the class defaults.
    pub fn instantiate(&self, class: &ClassRef) -> InstanceRef {
        let mut members = Members::default();
        for (key, value) in class.defaults() {
            members.set(key.clone(), value.clone());
        }
        InstanceRef(Rc::new(RefCell::new(Instance {
            class: class.clone(),
            members,
        })))
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> bool {
        let key = self.string(name);
        self.globals.set(key, value)
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.get_str(name)
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_arg(args: &[Value]) -> Value {
        args.first().cloned().unwrap_or_default()
    }

    #[test]
    fn prune_releases_unreferenced_strings() {
        let mut runtime = ScriptRuntime::new();
        let kept = runtime.string("door");
        runtime.set_global("label", kept);
        runtime.intern("scratch");
        assert_eq!(runtime.interned_strings(), 3);
        assert_eq!(runtime.prune_strings(), 1);
        assert_eq!(runtime.interned_strings(), 2);
        let again = runtime.intern("label");
        assert_eq!(runtime.interned_strings(), 2);
        drop(again);
    }

    #[test]
    fn interned_strings_share_storage() {
        let mut runtime = ScriptRuntime::new();
        let a = runtime.intern("door");
        let b = runtime.intern("door");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn weak_reference_collapses_to_null() {
        let table = TableRef::new();
        let weak = Value::Table(table.clone()).downgrade();
        assert!(weak.resolve_weak().raw_eq(&Value::Table(table.clone())));
        drop(table);
        assert!(weak.resolve_weak().is_null());
    }

    #[test]
    fn members_keep_insertion_order_and_refuse_null_keys() {
        let mut runtime = ScriptRuntime::new();
        let table = runtime.create_table();
        let b = runtime.string("b");
        let a = runtime.string("a");
        assert!(table.set(b.clone(), 1.into()));
        assert!(table.set(a, 2.into()));
        assert!(table.set(b, 3.into()));
        assert!(!table.set(Value::Null, 4.into()));
        let keys: Vec<String> = table
            .snapshot()
            .iter()
            .filter_map(|(key, _)| key.as_str().map(str::to_string))
            .collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(table.get_str("b").as_int(), Some(3));
    }

    #[test]
    fn instances_copy_class_defaults() {
        let mut runtime = ScriptRuntime::new();
        let hp = runtime.string("hp");
        let class = ClassRef::with_user_type("Actor", 0, vec![(hp.clone(), 10.into())]);
        let first = runtime.instantiate(&class);
        let second = runtime.instantiate(&class);
        first.set(hp.clone(), 3.into());
        assert_eq!(first.get(&hp).as_int(), Some(3));
        assert_eq!(second.get(&hp).as_int(), Some(10));
        assert!(first.class().ptr_eq(&class));
    }

    #[test]
    fn native_closures_call_through() {
        let native = NativeClosureRef::new("identity", first_arg);
        assert_eq!(native.call(&[7.into()]).as_int(), Some(7));
    }

    #[test]
    fn debug_output_of_cycles_terminates() {
        let table = TableRef::new();
        table.set(Value::Integer(1), Value::Table(table.clone()));
        let rendered = format!("{:?}", Value::Table(table));
        assert!(rendered.starts_with("table@"));
    }
}
