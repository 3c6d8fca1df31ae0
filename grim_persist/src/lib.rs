//! Save/load support for the embedded script runtime.
//!
//! Two independent layers live here: [`RuntimeValue`], a plain value tree
//! used by the [`PersistentRegistry`], and the [`graph`] module, which
//! snapshots and restores the runtime's shared, possibly cyclic, object graph.

pub mod cursor;
pub mod error;
pub mod graph;
pub mod index_cache;
pub mod processed;
pub mod registry;
pub mod runtime;
pub mod user_types;
pub mod value;

pub use cursor::{ByteReader, ByteWriter};
pub use error::{
    GraphError, HookError, KindMismatch, NamedKind, StreamError, UnresolvedName, ValueCodecError,
};
pub use graph::{
    DeserializeOptions, GraphDeserializer, GraphSerializer, GraphStats, GraphSummary, LoadOutcome,
    LoadState, SerializeOptions, SerializedGraph,
};
pub use index_cache::{
    ClassIndexCache, FunctionIndexCache, FunctionRef, IndexCaches, ObjectIndexCache,
};
pub use processed::{ObjectRef, ProcessedObject, RefKind};
pub use registry::{PersistentRegistry, RegistryScope};
pub use runtime::{
    ArrayRef, ClassRef, ClosureRef, InstanceRef, NativeClosureRef, ScriptRuntime, TableRef, TypeTag,
    Value, WeakRef,
};
pub use user_types::{UserTypeHook, UserTypeHooks, DEFAULT_USER_TYPE};
pub use value::{RuntimeValue, ValueKind};
