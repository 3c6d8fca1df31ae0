//! Escape hatch for engine types with a hand-written compact encoding.

use std::collections::HashMap;

use crate::cursor::{ByteReader, ByteWriter};
use crate::error::HookError;
use crate::runtime::{InstanceRef, ScriptRuntime};

/// Tag carried by classes without a dedicated codec.
pub const DEFAULT_USER_TYPE: u32 = 0;

/// Encodes and decodes instances of one host-registered user type.
///
/// The payload is opaque to the graph layer; it is length-prefixed on the
/// wire so the reader hands the hook exactly what the writer produced.
pub trait UserTypeHook {
    fn serialize(&self, instance: &InstanceRef, writer: &mut ByteWriter) -> Result<(), HookError>;

    fn unserialize(
        &self,
        reader: &mut ByteReader<'_>,
        runtime: &mut ScriptRuntime,
    ) -> Result<InstanceRef, HookError>;
}

#[derive(Default)]
pub struct UserTypeHooks {
    hooks: HashMap<u32, Box<dyn UserTypeHook>>,
}

impl UserTypeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hook` for `tag`. The default tag cannot be claimed.
    pub fn register(&mut self, tag: u32, hook: Box<dyn UserTypeHook>) -> bool {
        if tag == DEFAULT_USER_TYPE {
            log::warn!("[grim_persist] refusing to register a hook for the default user type");
            return false;
        }
        self.hooks.insert(tag, hook);
        true
    }

    pub fn get(&self, tag: u32) -> Option<&dyn UserTypeHook> {
        self.hooks.get(&tag).map(|hook| hook.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ClassRef;

    struct Marker {
        class: ClassRef,
    }

    impl UserTypeHook for Marker {
        fn serialize(&self, _: &InstanceRef, writer: &mut ByteWriter) -> Result<(), HookError> {
            writer.put_u8(1);
            Ok(())
        }

        fn unserialize(
            &self,
            reader: &mut ByteReader<'_>,
            runtime: &mut ScriptRuntime,
        ) -> Result<InstanceRef, HookError> {
            match reader.get_u8()? {
                1 => Ok(runtime.instantiate(&self.class)),
                other => Err(HookError::Invalid(format!("unexpected marker {other}"))),
            }
        }
    }

    #[test]
    fn default_tag_cannot_be_claimed() {
        let mut hooks = UserTypeHooks::new();
        let class = ClassRef::with_user_type("Marker", 3, Vec::new());
        assert!(!hooks.register(
            DEFAULT_USER_TYPE,
            Box::new(Marker {
                class: class.clone()
            })
        ));
        assert!(hooks.is_empty());
        assert!(hooks.register(3, Box::new(Marker { class })));
        assert!(hooks.get(3).is_some());
        assert!(hooks.get(4).is_none());
    }

    #[test]
    fn hook_reads_only_its_payload() {
        let mut hooks = UserTypeHooks::new();
        let class = ClassRef::with_user_type("Marker", 3, Vec::new());
        hooks.register(3, Box::new(Marker { class: class.clone() }));
        let mut runtime = ScriptRuntime::new();
        let hook = hooks.get(3).unwrap();

        let instance = hook
            .unserialize(&mut ByteReader::new(&[1]), &mut runtime)
            .unwrap();
        assert!(instance.class().ptr_eq(&class));
        assert!(matches!(
            hook.unserialize(&mut ByteReader::new(&[2]), &mut runtime),
            Err(HookError::Invalid(_))
        ));
        assert!(matches!(
            hook.unserialize(&mut ByteReader::new(&[]), &mut runtime),
            Err(HookError::Stream(_))
        ));
    }
}
