//! Exposes the [`PersistentRegistry`] to game scripts as a global `Registry`
//! table.
//!
//! ```lua
//! Registry.set("options.subtitles", true)
//! local seen = Registry.get_persistent("extras.concept_art")
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use grim_persist::value::MAX_DEPTH;
use grim_persist::{PersistentRegistry, RegistryScope, RuntimeValue};
use mlua::{Error as LuaError, Lua, Result as LuaResult, Table, Value, Variadic};

/// Installs `Registry.get/set/get_persistent/set_persistent/remove`.
///
/// Both `Registry.get(path)` and `Registry:get(path)` are accepted.
pub fn install_registry(lua: &Lua, registry: Rc<RefCell<PersistentRegistry>>) -> LuaResult<()> {
    let table = lua.create_table()?;

    for (name, scope) in [
        ("get", RegistryScope::Session),
        ("get_persistent", RegistryScope::Persistent),
    ] {
        let get_registry = registry.clone();
        table.set(
            name,
            lua.create_function(move |lua_ctx, args: Variadic<Value>| {
                let values = strip_self(args);
                let path = path_arg(&values, name)?;
                let registry = get_registry.borrow();
                runtime_to_lua(lua_ctx, registry.get(scope, &path))
            })?,
        )?;
    }

    for (name, scope) in [
        ("set", RegistryScope::Session),
        ("set_persistent", RegistryScope::Persistent),
    ] {
        let set_registry = registry.clone();
        table.set(
            name,
            lua.create_function(move |_, args: Variadic<Value>| {
                let values = strip_self(args);
                let path = path_arg(&values, name)?;
                let value = match values.get(1) {
                    Some(value) => lua_to_runtime(value)?,
                    None => RuntimeValue::Null,
                };
                Ok(set_registry.borrow_mut().set(scope, &path, value))
            })?,
        )?;
    }

    let remove_registry = registry;
    table.set(
        "remove",
        lua.create_function(move |_, args: Variadic<Value>| {
            let values = strip_self(args);
            let path = path_arg(&values, "remove")?;
            let scope = match values.get(1) {
                Some(Value::Boolean(true)) => RegistryScope::Persistent,
                _ => RegistryScope::Session,
            };
            Ok(remove_registry.borrow_mut().remove(scope, &path).is_some())
        })?,
    )?;

    lua.globals().set("Registry", table)?;
    Ok(())
}

/// Drops a leading `self` table left by method-call syntax.
fn strip_self(args: Variadic<Value>) -> Vec<Value> {
    let mut values: Vec<Value> = args.into_iter().collect();
    if matches!(values.first(), Some(Value::Table(_))) {
        values.remove(0);
    }
    values
}

fn path_arg(values: &[Value], function: &str) -> LuaResult<String> {
    match values.first() {
        Some(Value::String(path)) => Ok(path.to_str()?.to_string()),
        _ => Err(LuaError::RuntimeError(format!(
            "Registry.{function} expects a dotted path string"
        ))),
    }
}

/// Builds a Lua value from a registry value. Arrays become 1-based sequences.
pub fn runtime_to_lua<'lua>(lua: &'lua Lua, value: &RuntimeValue) -> LuaResult<Value<'lua>> {
    let converted = match value {
        RuntimeValue::Null => Value::Nil,
        RuntimeValue::Bool(value) => Value::Boolean(*value),
        RuntimeValue::Int(value) => Value::Number(f64::from(*value)),
        RuntimeValue::Float(value) => Value::Number(f64::from(*value)),
        RuntimeValue::String(value) => Value::String(lua.create_string(value)?),
        RuntimeValue::Array(items) => {
            let table = lua.create_table()?;
            for (index, item) in items.iter().enumerate() {
                table.raw_set(index + 1, runtime_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        RuntimeValue::Table(entries) => {
            let table = lua.create_table()?;
            for (key, item) in entries {
                table.raw_set(key.as_str(), runtime_to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    };
    Ok(converted)
}

/// Converts a script value for storage. Functions, userdata and tables that
/// mix key styles cannot be stored and raise a Lua error.
pub fn lua_to_runtime(value: &Value) -> LuaResult<RuntimeValue> {
    lua_to_runtime_at(value, 0)
}

fn lua_to_runtime_at(value: &Value, depth: usize) -> LuaResult<RuntimeValue> {
    if depth > MAX_DEPTH {
        return Err(LuaError::RuntimeError(format!(
            "registry values nest deeper than {MAX_DEPTH} levels"
        )));
    }
    let converted = match value {
        Value::Nil => RuntimeValue::Null,
        Value::Boolean(value) => RuntimeValue::Bool(*value),
        Value::Integer(value) => match i32::try_from(*value) {
            Ok(value) => RuntimeValue::Int(value),
            Err(_) => RuntimeValue::Float(*value as f32),
        },
        Value::Number(value) => number_to_runtime(*value),
        Value::String(value) => RuntimeValue::String(value.to_str()?.to_string()),
        Value::Table(table) => table_to_runtime(table, depth)?,
        other => {
            return Err(LuaError::RuntimeError(format!(
                "cannot store a {} in the registry",
                other.type_name()
            )))
        }
    };
    Ok(converted)
}

fn number_to_runtime(value: f64) -> RuntimeValue {
    let integral =
        value.fract() == 0.0 && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX);
    if integral {
        RuntimeValue::Int(value as i32)
    } else {
        RuntimeValue::Float(value as f32)
    }
}

fn sequence_index(key: &Value) -> Option<usize> {
    match key {
        Value::Integer(index) => usize::try_from(*index).ok(),
        Value::Number(index) if index.fract() == 0.0 && *index >= 1.0 => Some(*index as usize),
        _ => None,
    }
}

fn table_to_runtime(table: &Table, depth: usize) -> LuaResult<RuntimeValue> {
    let pairs = table
        .clone()
        .pairs::<Value, Value>()
        .collect::<LuaResult<Vec<_>>>()?;
    if pairs.is_empty() {
        return Ok(RuntimeValue::create_table());
    }

    let len = table.raw_len();
    let is_sequence = len == pairs.len()
        && pairs.iter().all(|(key, _)| {
            matches!(sequence_index(key), Some(index) if index >= 1 && index <= len)
        });
    if is_sequence {
        let mut items = vec![RuntimeValue::Null; len];
        for (key, value) in &pairs {
            if let Some(index) = sequence_index(key) {
                items[index - 1] = lua_to_runtime_at(value, depth + 1)?;
            }
        }
        return Ok(RuntimeValue::Array(items));
    }

    let mut entries = Vec::with_capacity(pairs.len());
    for (key, value) in &pairs {
        let Value::String(key) = key else {
            return Err(LuaError::RuntimeError(format!(
                "registry tables need string keys or a 1..n sequence, found a {} key",
                key.type_name()
            )));
        };
        entries.push((key.to_str()?.to_string(), lua_to_runtime_at(value, depth + 1)?));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(RuntimeValue::Table(entries))
}
