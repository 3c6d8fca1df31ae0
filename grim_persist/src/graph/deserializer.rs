use std::convert::TryFrom;

use crate::cursor::ByteReader;
use crate::error::{GraphError, NamedKind, StreamError, UnresolvedName};
use crate::index_cache::{FunctionRef, IndexCaches};
use crate::processed::{ObjectRef, ProcessedObject, RefKind};
use crate::runtime::{
    ArrayRef, ClassRef, InstanceRef, ScriptRuntime, ScriptString, TableRef, Value,
};
use crate::user_types::{UserTypeHooks, DEFAULT_USER_TYPE};

use super::{GraphStats, Section, NO_ROOT_TABLE};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeserializeOptions {
    /// Treat a class, function or user type missing from the loaded program
    /// as a structural failure instead of nulling the slot.
    pub strict_names: bool,
}

/// Phases of one load, in the order the sections appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Strings,
    ClassRefs,
    ClosureRefs,
    Arrays,
    Tables,
    Instances,
    Resolve,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct LoadOutcome {
    /// The merged global table, or the first table when the payload did not
    /// ask for a merge.
    pub root: Option<TableRef>,
    pub unresolved: Vec<UnresolvedName>,
    pub stats: GraphStats,
}

#[derive(Clone)]
enum Owner {
    Array(ArrayRef),
    Table(TableRef),
    Instance(InstanceRef),
}

/// A slot write held back until every object of the load exists.
struct DeferredRef {
    owner: Owner,
    key: ProcessedObject,
    value: ProcessedObject,
}

/// Rebuilds an object graph in two phases: every section first allocates
/// shells and records slot writes, then `Resolve` replays those writes once
/// all kind tables are complete.
///
/// Table and instance members are all replayed in stream order so a rebuilt
/// table keeps the member order it was saved with. Globals are not written
/// until every queued write has been validated.
pub struct GraphDeserializer<'a> {
    runtime: &'a mut ScriptRuntime,
    caches: &'a IndexCaches,
    hooks: &'a UserTypeHooks,
    options: DeserializeOptions,
    state: LoadState,
    strings: Vec<ScriptString>,
    classes: Vec<Option<ClassRef>>,
    closures: Vec<Option<FunctionRef>>,
    arrays: Vec<ArrayRef>,
    tables: Vec<TableRef>,
    instances: Vec<Option<InstanceRef>>,
    deferred: Vec<DeferredRef>,
    root_index: Option<usize>,
    unresolved: Vec<UnresolvedName>,
    resolved_writes: usize,
    skipped: usize,
}

impl<'a> GraphDeserializer<'a> {
    pub fn new(
        runtime: &'a mut ScriptRuntime,
        caches: &'a IndexCaches,
        hooks: &'a UserTypeHooks,
    ) -> Self {
        GraphDeserializer {
            runtime,
            caches,
            hooks,
            options: DeserializeOptions::default(),
            state: LoadState::Strings,
            strings: Vec::new(),
            classes: Vec::new(),
            closures: Vec::new(),
            arrays: Vec::new(),
            tables: Vec::new(),
            instances: Vec::new(),
            deferred: Vec::new(),
            root_index: None,
            unresolved: Vec::new(),
            resolved_writes: 0,
            skipped: 0,
        }
    }

    pub fn with_options(mut self, options: DeserializeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Loads one payload. Every object created here is released again
    /// before returning, so what survives is exactly what the rebuilt graph
    /// and the globals merge keep alive. Strings interned for the load and
    /// left unreferenced are pruned from the runtime's pool.
    pub fn unserialize(&mut self, bytes: &[u8]) -> Result<LoadOutcome, GraphError> {
        self.state = LoadState::Strings;
        let mut reader = ByteReader::new(bytes);
        let result = self.run(&mut reader).map(|()| self.outcome());
        self.release();
        let pruned = self.runtime.prune_strings();
        if pruned > 0 {
            log::trace!("[grim_persist] released {pruned} pooled strings after load");
        }
        result
    }

    fn run(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        while self.state != LoadState::Done {
            match self.step(reader) {
                Ok(next) => {
                    log::trace!("[grim_persist] load {:?} -> {next:?}", self.state);
                    self.state = next;
                }
                Err(err) => {
                    log::warn!(
                        "[grim_persist] graph load failed in {:?} at byte {}: {err}",
                        self.state,
                        reader.position()
                    );
                    self.state = LoadState::Failed;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, reader: &mut ByteReader<'_>) -> Result<LoadState, GraphError> {
        let next = match self.state {
            LoadState::Strings => {
                self.read_strings(reader)?;
                LoadState::ClassRefs
            }
            LoadState::ClassRefs => {
                self.read_class_refs(reader)?;
                LoadState::ClosureRefs
            }
            LoadState::ClosureRefs => {
                self.read_closure_refs(reader)?;
                LoadState::Arrays
            }
            LoadState::Arrays => {
                self.read_arrays(reader)?;
                LoadState::Tables
            }
            LoadState::Tables => {
                self.read_tables(reader)?;
                LoadState::Instances
            }
            LoadState::Instances => {
                self.read_instances(reader)?;
                if !reader.is_empty() {
                    return Err(GraphError::TrailingBytes(reader.remaining()));
                }
                LoadState::Resolve
            }
            LoadState::Resolve => {
                self.resolve()?;
                LoadState::Done
            }
            LoadState::Done | LoadState::Failed => self.state,
        };
        Ok(next)
    }

    fn read_strings(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        Section::Strings.expect(reader)?;
        let count = reader.get_len()?;
        reader.ensure_items(count, 4)?;
        self.strings.reserve(count);
        for _ in 0..count {
            let text = reader.get_str()?;
            let interned = self.runtime.intern(text);
            self.strings.push(interned);
        }
        Ok(())
    }

    fn read_class_refs(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        let caches = self.caches;
        for name in read_names(reader, Section::ClassRefs)? {
            let class = caches.classes.handle_for(name);
            if class.is_none() {
                self.note_unresolved(NamedKind::Class, name)?;
            }
            self.classes.push(class);
        }
        Ok(())
    }

    fn read_closure_refs(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        let caches = self.caches;
        for name in read_names(reader, Section::ClosureRefs)? {
            let function = caches.functions.handle_for(name);
            if function.is_none() {
                self.note_unresolved(NamedKind::Function, name)?;
            }
            self.closures.push(function);
        }
        Ok(())
    }

    fn note_unresolved(&mut self, kind: NamedKind, name: &str) -> Result<(), GraphError> {
        let unresolved = UnresolvedName {
            kind,
            name: name.to_string(),
        };
        if self.options.strict_names {
            return Err(GraphError::Unresolved(unresolved));
        }
        log::warn!("[grim_persist] {unresolved}; dependent slots load as null");
        self.unresolved.push(unresolved);
        Ok(())
    }

    fn read_arrays(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        Section::Arrays.expect(reader)?;
        let count = reader.get_len()?;
        reader.ensure_items(count, 4)?;
        self.arrays.reserve(count);
        for _ in 0..count {
            let len = reader.get_len()?;
            reader.ensure_items(len, 1)?;
            let array = self.runtime.create_array(len);
            self.arrays.push(array.clone());
            for slot in 0..len {
                let value = ProcessedObject::read(reader)?;
                match immediate(value) {
                    Some(value) => {
                        array.set(slot, value);
                    }
                    None => {
                        let slot =
                            i32::try_from(slot).map_err(|_| StreamError::LengthOverflow(slot))?;
                        self.deferred.push(DeferredRef {
                            owner: Owner::Array(array.clone()),
                            key: ProcessedObject::Int(slot),
                            value,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads a member list and queues every pair against `owner`, scalars
    /// included, so members land in stream order once `Resolve` runs.
    /// Without an owner the members are consumed and dropped.
    fn read_members(
        &mut self,
        reader: &mut ByteReader<'_>,
        owner: Option<&Owner>,
    ) -> Result<(), GraphError> {
        let count = reader.get_len()?;
        reader.ensure_items(count, 2)?;
        for _ in 0..count {
            let key = ProcessedObject::read(reader)?;
            let value = ProcessedObject::read(reader)?;
            if key == ProcessedObject::Null {
                return Err(GraphError::NullKey);
            }
            match owner {
                Some(owner) => self.deferred.push(DeferredRef {
                    owner: owner.clone(),
                    key,
                    value,
                }),
                None => self.skipped += 1,
            }
        }
        Ok(())
    }

    fn read_tables(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        Section::Tables.expect(reader)?;
        let root_index = reader.get_i32()?;
        let count = reader.get_len()?;
        reader.ensure_items(count, 4)?;
        self.root_index = match root_index {
            NO_ROOT_TABLE => None,
            index => match usize::try_from(index) {
                Ok(position) if position < count => Some(position),
                _ => return Err(GraphError::BadRootIndex { index, count }),
            },
        };

        self.tables.reserve(count);
        for position in 0..count {
            let table = if self.root_index == Some(position) {
                self.runtime.globals()
            } else {
                self.runtime.create_table()
            };
            self.tables.push(table.clone());
            self.read_members(reader, Some(&Owner::Table(table)))?;
        }
        Ok(())
    }

    fn read_instances(&mut self, reader: &mut ByteReader<'_>) -> Result<(), GraphError> {
        Section::Instances.expect(reader)?;
        let count = reader.get_len()?;
        reader.ensure_items(count, 4)?;
        self.instances.reserve(count);
        let hooks = self.hooks;
        for _ in 0..count {
            let user_type = reader.get_u32()?;
            if user_type != DEFAULT_USER_TYPE {
                let len = reader.get_len()?;
                let payload = reader.get_bytes(len)?;
                let instance = match hooks.get(user_type) {
                    Some(hook) => {
                        let mut payload_reader = ByteReader::new(payload);
                        let instance = hook
                            .unserialize(&mut payload_reader, self.runtime)
                            .map_err(|source| GraphError::Hook {
                                tag: user_type,
                                source,
                            })?;
                        Some(instance)
                    }
                    None => {
                        self.note_unresolved(NamedKind::UserType, &user_type.to_string())?;
                        self.skipped += 1;
                        None
                    }
                };
                self.instances.push(instance);
                continue;
            }

            let class_index = reader.get_u32()?;
            let class = fetch(
                &self.classes,
                ObjectRef {
                    kind: RefKind::Class,
                    index: class_index,
                    is_weak: false,
                },
            )?
            .clone();
            let instance = class.map(|class| self.runtime.instantiate(&class));
            if instance.is_none() {
                self.skipped += 1;
            }
            self.instances.push(instance.clone());
            let owner = instance.map(Owner::Instance);
            self.read_members(reader, owner.as_ref())?;
        }
        Ok(())
    }

    fn resolve(&mut self) -> Result<(), GraphError> {
        // Check every index before the first write so a corrupt reference
        // cannot leave the globals half wired.
        for deferred in &self.deferred {
            self.lookup(deferred.key)?;
            self.lookup(deferred.value)?;
        }

        let deferred = std::mem::take(&mut self.deferred);
        self.resolved_writes = deferred.len();
        if let Some(root) = self.root_index {
            log::debug!("[grim_persist] merging table {root} into globals");
        }
        for DeferredRef { owner, key, value } in deferred {
            let key = self.lookup(key)?;
            let value = self.lookup(value)?;
            match owner {
                Owner::Array(array) => {
                    let slot = match key {
                        Value::Integer(slot) => usize::try_from(slot)
                            .map_err(|_| GraphError::InvalidArraySlot)?,
                        _ => return Err(GraphError::InvalidArraySlot),
                    };
                    array.set(slot, value);
                }
                Owner::Table(table) => {
                    if !table.set(key, value) {
                        self.skipped += 1;
                    }
                }
                Owner::Instance(instance) => {
                    if !instance.set(key, value) {
                        self.skipped += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves a descriptor against the completed kind tables. Placeholders
    /// for unresolved names come back as Null, and a weak flag turns the
    /// handle into a weak reference.
    fn lookup(&self, processed: ProcessedObject) -> Result<Value, GraphError> {
        let reference = match processed {
            ProcessedObject::Null => return Ok(Value::Null),
            ProcessedObject::Bool(value) => return Ok(Value::Bool(value)),
            ProcessedObject::Int(value) => return Ok(Value::Integer(value)),
            ProcessedObject::Float(value) => return Ok(Value::Float(value)),
            ProcessedObject::Ref(reference) => reference,
        };
        let value = match reference.kind {
            RefKind::String => Value::String(fetch(&self.strings, reference)?.clone()),
            RefKind::Array => Value::Array(fetch(&self.arrays, reference)?.clone()),
            RefKind::Table => Value::Table(fetch(&self.tables, reference)?.clone()),
            RefKind::Instance => fetch(&self.instances, reference)?
                .clone()
                .map(Value::Instance)
                .unwrap_or_default(),
            RefKind::Class => fetch(&self.classes, reference)?
                .clone()
                .map(Value::Class)
                .unwrap_or_default(),
            RefKind::Closure | RefKind::NativeClosure => fetch(&self.closures, reference)?
                .as_ref()
                .map(FunctionRef::to_value)
                .unwrap_or_default(),
        };
        if reference.is_weak {
            Ok(value.downgrade())
        } else {
            Ok(value)
        }
    }

    fn outcome(&mut self) -> LoadOutcome {
        let root = match self.root_index {
            Some(_) => Some(self.runtime.globals()),
            None => self.tables.first().cloned(),
        };
        let stats = GraphStats {
            strings: self.strings.len(),
            classes: self.classes.len(),
            closures: self.closures.len(),
            arrays: self.arrays.len(),
            tables: self.tables.len(),
            instances: self.instances.len(),
            deferred: self.resolved_writes,
            skipped: self.skipped,
        };
        log::debug!("[grim_persist] loaded graph: {stats:?}");
        LoadOutcome {
            root,
            unresolved: std::mem::take(&mut self.unresolved),
            stats,
        }
    }

    /// Drops every handle this load was holding.
    fn release(&mut self) {
        self.strings.clear();
        self.classes.clear();
        self.closures.clear();
        self.arrays.clear();
        self.tables.clear();
        self.instances.clear();
        self.deferred.clear();
        self.unresolved.clear();
        self.root_index = None;
        self.resolved_writes = 0;
        self.skipped = 0;
    }
}

fn read_names<'b>(
    reader: &mut ByteReader<'b>,
    section: Section,
) -> Result<Vec<&'b str>, GraphError> {
    section.expect(reader)?;
    let count = reader.get_len()?;
    reader.ensure_items(count, 4)?;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(reader.get_str()?);
    }
    Ok(names)
}

fn immediate(processed: ProcessedObject) -> Option<Value> {
    match processed {
        ProcessedObject::Null => Some(Value::Null),
        ProcessedObject::Bool(value) => Some(Value::Bool(value)),
        ProcessedObject::Int(value) => Some(Value::Integer(value)),
        ProcessedObject::Float(value) => Some(Value::Float(value)),
        ProcessedObject::Ref(_) => None,
    }
}

fn fetch<T>(table: &[T], reference: ObjectRef) -> Result<&T, GraphError> {
    table
        .get(reference.index as usize)
        .ok_or(GraphError::IndexOutOfRange {
            kind: reference.kind,
            index: reference.index,
            len: table.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteWriter;

    fn empty_sections(writer: &mut ByteWriter, upto: u8) {
        for tag in 1..=upto {
            writer.put_u8(tag);
            if tag == 5 {
                writer.put_i32(NO_ROOT_TABLE);
            }
            writer.put_u32(0);
        }
    }

    #[test]
    fn empty_payload_loads_without_root() {
        let mut writer = ByteWriter::new();
        empty_sections(&mut writer, 6);
        let mut runtime = ScriptRuntime::new();
        let caches = IndexCaches::new();
        let hooks = UserTypeHooks::new();
        let mut loader = GraphDeserializer::new(&mut runtime, &caches, &hooks);
        let outcome = loader.unserialize(writer.as_slice()).unwrap();
        assert!(outcome.root.is_none());
        assert_eq!(outcome.stats, GraphStats::default());
        assert_eq!(loader.state(), LoadState::Done);
    }

    #[test]
    fn out_of_order_section_fails() {
        let mut writer = ByteWriter::new();
        empty_sections(&mut writer, 2);
        writer.put_u8(4);
        writer.put_u32(0);
        let mut runtime = ScriptRuntime::new();
        let caches = IndexCaches::new();
        let hooks = UserTypeHooks::new();
        let mut loader = GraphDeserializer::new(&mut runtime, &caches, &hooks);
        let err = loader.unserialize(writer.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnexpectedSection {
                expected: Section::ClosureRefs,
                found: 4
            }
        ));
        assert_eq!(loader.state(), LoadState::Failed);
    }

    #[test]
    fn root_index_past_table_count_is_rejected() {
        let mut writer = ByteWriter::new();
        empty_sections(&mut writer, 4);
        writer.put_u8(5);
        writer.put_i32(2);
        writer.put_u32(1);
        writer.put_u32(0);
        let mut runtime = ScriptRuntime::new();
        let caches = IndexCaches::new();
        let hooks = UserTypeHooks::new();
        let err = GraphDeserializer::new(&mut runtime, &caches, &hooks)
            .unserialize(writer.as_slice())
            .unwrap_err();
        assert!(matches!(err, GraphError::BadRootIndex { index: 2, count: 1 }));
    }

    #[test]
    fn null_member_key_is_structural() {
        let mut writer = ByteWriter::new();
        empty_sections(&mut writer, 4);
        writer.put_u8(5);
        writer.put_i32(NO_ROOT_TABLE);
        writer.put_u32(1);
        writer.put_u32(1);
        ProcessedObject::Null.write(&mut writer);
        ProcessedObject::Int(3).write(&mut writer);
        let mut runtime = ScriptRuntime::new();
        let caches = IndexCaches::new();
        let hooks = UserTypeHooks::new();
        let err = GraphDeserializer::new(&mut runtime, &caches, &hooks)
            .unserialize(writer.as_slice())
            .unwrap_err();
        assert!(matches!(err, GraphError::NullKey));
    }

    #[test]
    fn huge_array_count_does_not_allocate() {
        let mut writer = ByteWriter::new();
        empty_sections(&mut writer, 3);
        writer.put_u8(4);
        writer.put_u32(1);
        writer.put_u32(u32::MAX);
        let mut runtime = ScriptRuntime::new();
        let caches = IndexCaches::new();
        let hooks = UserTypeHooks::new();
        let err = GraphDeserializer::new(&mut runtime, &caches, &hooks)
            .unserialize(writer.as_slice())
            .unwrap_err();
        assert!(matches!(err, GraphError::Stream(StreamError::Truncated { .. })));
    }
}
