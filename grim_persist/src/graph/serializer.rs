use crate::cursor::ByteWriter;
use crate::error::GraphError;
use crate::index_cache::{FunctionRef, IndexCaches};
use crate::processed::{ProcessedObject, RefKind};
use crate::runtime::{ArrayRef, ClassRef, InstanceRef, ScriptString, TableRef, Value};
use crate::user_types::{UserTypeHooks, DEFAULT_USER_TYPE};

use super::{GraphStats, KindTable, Section, NO_ROOT_TABLE};

#[derive(Debug, Clone, Copy, Default)]
pub struct SerializeOptions {
    /// Flag the root table so the loader merges it into its own globals.
    pub merge_root_into_globals: bool,
}

#[derive(Debug, Clone)]
pub struct SerializedGraph {
    pub bytes: Vec<u8>,
    pub stats: GraphStats,
}

enum Pending {
    Array(u32),
    Table(u32),
    Instance(u32),
}

#[derive(Clone, Copy)]
enum Layout {
    Host(u32),
    Generic(u32),
}

enum InstanceBody {
    Generic {
        class_index: u32,
        members: Vec<(ProcessedObject, ProcessedObject)>,
    },
    Host {
        tag: u32,
        payload: Vec<u8>,
    },
}

/// Walks everything reachable from a root table and writes each object once.
///
/// An object gets its index the moment it is first seen and its members are
/// visited later from a work stack, so a reference back into an object that
/// is still being written just reuses the index.
pub struct GraphSerializer<'a> {
    caches: &'a IndexCaches,
    hooks: &'a UserTypeHooks,
    options: SerializeOptions,
    strings: KindTable<ScriptString, ScriptString>,
    classes: KindTable<usize, String>,
    closures: KindTable<usize, String>,
    arrays: KindTable<usize, ArrayRef>,
    tables: KindTable<usize, TableRef>,
    instances: KindTable<usize, InstanceRef>,
    array_bodies: Vec<Vec<ProcessedObject>>,
    table_bodies: Vec<Vec<(ProcessedObject, ProcessedObject)>>,
    instance_bodies: Vec<InstanceBody>,
    pending: Vec<Pending>,
    skipped: usize,
}

impl<'a> GraphSerializer<'a> {
    pub fn new(caches: &'a IndexCaches, hooks: &'a UserTypeHooks) -> Self {
        GraphSerializer {
            caches,
            hooks,
            options: SerializeOptions::default(),
            strings: KindTable::new(),
            classes: KindTable::new(),
            closures: KindTable::new(),
            arrays: KindTable::new(),
            tables: KindTable::new(),
            instances: KindTable::new(),
            array_bodies: Vec::new(),
            table_bodies: Vec::new(),
            instance_bodies: Vec::new(),
            pending: Vec::new(),
            skipped: 0,
        }
    }

    pub fn with_options(mut self, options: SerializeOptions) -> Self {
        self.options = options;
        self
    }

    /// Serializes the graph hanging off `root`. The root always becomes
    /// table 0.
    pub fn serialize_root(mut self, root: &TableRef) -> Result<SerializedGraph, GraphError> {
        self.visit(&Value::Table(root.clone()))?;
        self.drain()?;
        let root_index = if self.options.merge_root_into_globals {
            0
        } else {
            NO_ROOT_TABLE
        };
        self.finish(root_index)
    }

    fn visit(&mut self, value: &Value) -> Result<Option<ProcessedObject>, GraphError> {
        let processed = match value {
            Value::Null => ProcessedObject::Null,
            Value::Bool(value) => ProcessedObject::Bool(*value),
            Value::Integer(value) => ProcessedObject::Int(*value),
            Value::Float(value) => ProcessedObject::Float(*value),
            Value::String(string) => {
                let (index, _) = self.strings.intern(string.clone(), || string.clone())?;
                ProcessedObject::strong(RefKind::String, index)
            }
            Value::Array(array) => {
                let (index, is_new) = self.arrays.intern(array.identity(), || array.clone())?;
                if is_new {
                    self.array_bodies.push(Vec::new());
                    self.pending.push(Pending::Array(index));
                }
                ProcessedObject::strong(RefKind::Array, index)
            }
            Value::Table(table) => {
                let (index, is_new) = self.tables.intern(table.identity(), || table.clone())?;
                if is_new {
                    self.table_bodies.push(Vec::new());
                    self.pending.push(Pending::Table(index));
                }
                ProcessedObject::strong(RefKind::Table, index)
            }
            Value::Instance(instance) => return self.visit_instance(instance),
            Value::Class(class) => match self.class_index(class)? {
                Some(index) => ProcessedObject::strong(RefKind::Class, index),
                None => return Ok(None),
            },
            Value::Closure(closure) => {
                return self.visit_function(FunctionRef::Closure(closure.clone()), RefKind::Closure)
            }
            Value::NativeClosure(native) => {
                return self.visit_function(
                    FunctionRef::Native(native.clone()),
                    RefKind::NativeClosure,
                )
            }
            Value::Weak(weak) => match weak.upgrade() {
                Value::Null => ProcessedObject::Null,
                target => return Ok(self.visit(&target)?.map(ProcessedObject::into_weak)),
            },
        };
        Ok(Some(processed))
    }

    fn class_index(&mut self, class: &ClassRef) -> Result<Option<u32>, GraphError> {
        let identity = class.identity();
        if let Some(index) = self.classes.get(&identity) {
            return Ok(Some(index));
        }
        let caches = self.caches;
        let Some(name) = caches.classes.name_for(class) else {
            log::warn!(
                "[grim_persist] class {} is not in the class cache; skipping reference",
                class.name()
            );
            self.skipped += 1;
            return Ok(None);
        };
        let (index, _) = self.classes.intern(identity, || name.to_string())?;
        Ok(Some(index))
    }

    fn visit_function(
        &mut self,
        function: FunctionRef,
        kind: RefKind,
    ) -> Result<Option<ProcessedObject>, GraphError> {
        let identity = function.identity();
        if let Some(index) = self.closures.get(&identity) {
            return Ok(Some(ProcessedObject::strong(kind, index)));
        }
        let caches = self.caches;
        let Some(name) = caches.functions.name_for(&function) else {
            log::warn!(
                "[grim_persist] function {} is not in the function cache; skipping reference",
                function.name()
            );
            self.skipped += 1;
            return Ok(None);
        };
        let (index, _) = self.closures.intern(identity, || name.to_string())?;
        Ok(Some(ProcessedObject::strong(kind, index)))
    }

    fn visit_instance(
        &mut self,
        instance: &InstanceRef,
    ) -> Result<Option<ProcessedObject>, GraphError> {
        if let Some(index) = self.instances.get(&instance.identity()) {
            return Ok(Some(ProcessedObject::strong(RefKind::Instance, index)));
        }

        let class = instance.class();
        let user_type = class.user_type();
        let body = if user_type != DEFAULT_USER_TYPE && self.hooks.get(user_type).is_some() {
            InstanceBody::Host {
                tag: user_type,
                payload: Vec::new(),
            }
        } else {
            let Some(class_index) = self.class_index(&class)? else {
                log::warn!(
                    "[grim_persist] instance of unnamed class {} dropped from save",
                    class.name()
                );
                return Ok(None);
            };
            InstanceBody::Generic {
                class_index,
                members: Vec::new(),
            }
        };

        let (index, _) = self
            .instances
            .intern(instance.identity(), || instance.clone())?;
        self.instance_bodies.push(body);
        self.pending.push(Pending::Instance(index));
        Ok(Some(ProcessedObject::strong(RefKind::Instance, index)))
    }

    fn visit_members(
        &mut self,
        entries: Vec<(Value, Value)>,
    ) -> Result<Vec<(ProcessedObject, ProcessedObject)>, GraphError> {
        let mut members = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Some(key) = self.visit(&key)? else {
                continue;
            };
            if key == ProcessedObject::Null {
                // Weak key whose target is already gone.
                continue;
            }
            let Some(value) = self.visit(&value)? else {
                continue;
            };
            members.push((key, value));
        }
        Ok(members)
    }

    fn drain(&mut self) -> Result<(), GraphError> {
        let hooks = self.hooks;
        while let Some(pending) = self.pending.pop() {
            match pending {
                Pending::Array(index) => {
                    let array = self.arrays.handles[index as usize].clone();
                    let elements = array.snapshot();
                    let mut body = Vec::with_capacity(elements.len());
                    for element in &elements {
                        // Arrays keep their shape, so unnameable elements become Null.
                        body.push(self.visit(element)?.unwrap_or(ProcessedObject::Null));
                    }
                    self.array_bodies[index as usize] = body;
                }
                Pending::Table(index) => {
                    let table = self.tables.handles[index as usize].clone();
                    let members = self.visit_members(table.snapshot())?;
                    self.table_bodies[index as usize] = members;
                }
                Pending::Instance(index) => {
                    let instance = self.instances.handles[index as usize].clone();
                    let layout = match &self.instance_bodies[index as usize] {
                        InstanceBody::Host { tag, .. } => Layout::Host(*tag),
                        InstanceBody::Generic { class_index, .. } => Layout::Generic(*class_index),
                    };
                    let body = match layout {
                        Layout::Host(tag) => {
                            let mut payload = ByteWriter::new();
                            if let Some(hook) = hooks.get(tag) {
                                hook.serialize(&instance, &mut payload)
                                    .map_err(|source| GraphError::Hook { tag, source })?;
                            }
                            InstanceBody::Host {
                                tag,
                                payload: payload.into_inner(),
                            }
                        }
                        Layout::Generic(class_index) => InstanceBody::Generic {
                            class_index,
                            members: self.visit_members(instance.snapshot())?,
                        },
                    };
                    self.instance_bodies[index as usize] = body;
                }
            }
        }
        Ok(())
    }

    fn finish(self, root_index: i32) -> Result<SerializedGraph, GraphError> {
        let mut writer = ByteWriter::new();

        Section::Strings.write(&mut writer);
        writer.put_len(self.strings.len())?;
        for string in &self.strings.handles {
            writer.put_str(string)?;
        }

        Section::ClassRefs.write(&mut writer);
        writer.put_len(self.classes.len())?;
        for name in &self.classes.handles {
            writer.put_str(name)?;
        }

        Section::ClosureRefs.write(&mut writer);
        writer.put_len(self.closures.len())?;
        for name in &self.closures.handles {
            writer.put_str(name)?;
        }

        Section::Arrays.write(&mut writer);
        writer.put_len(self.array_bodies.len())?;
        for body in &self.array_bodies {
            writer.put_len(body.len())?;
            for element in body {
                element.write(&mut writer);
            }
        }

        Section::Tables.write(&mut writer);
        writer.put_i32(root_index);
        writer.put_len(self.table_bodies.len())?;
        for body in &self.table_bodies {
            write_members(&mut writer, body)?;
        }

        Section::Instances.write(&mut writer);
        writer.put_len(self.instance_bodies.len())?;
        for body in &self.instance_bodies {
            match body {
                InstanceBody::Generic {
                    class_index,
                    members,
                } => {
                    writer.put_u32(DEFAULT_USER_TYPE);
                    writer.put_u32(*class_index);
                    write_members(&mut writer, members)?;
                }
                InstanceBody::Host { tag, payload } => {
                    writer.put_u32(*tag);
                    writer.put_len(payload.len())?;
                    writer.put_bytes(payload);
                }
            }
        }

        let stats = GraphStats {
            strings: self.strings.len(),
            classes: self.classes.len(),
            closures: self.closures.len(),
            arrays: self.arrays.len(),
            tables: self.tables.len(),
            instances: self.instances.len(),
            deferred: 0,
            skipped: self.skipped,
        };
        log::debug!(
            "[grim_persist] serialized graph: {} bytes, {stats:?}",
            writer.len()
        );
        Ok(SerializedGraph {
            bytes: writer.into_inner(),
            stats,
        })
    }
}

fn write_members(
    writer: &mut ByteWriter,
    members: &[(ProcessedObject, ProcessedObject)],
) -> Result<(), GraphError> {
    writer.put_len(members.len())?;
    for (key, value) in members {
        key.write(writer);
        value.write(writer);
    }
    Ok(())
}
