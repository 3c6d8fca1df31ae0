use std::cell::RefCell;
use std::fs;
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result};
use grim_persist::{
    ClassRef, IndexCaches, PersistentRegistry, RegistryScope, RuntimeValue, ScriptRuntime,
    UserTypeHooks, Value,
};
use grim_save::{
    encode_payload, install_registry, load_game, load_persistent, save_game, save_persistent,
    split_envelopes, PayloadKind, SaveContext,
};
use mlua::Lua;
use serde_json::Value as JsonValue;
use tempfile::tempdir;

fn boot_program(runtime: &mut ScriptRuntime) -> IndexCaches {
    runtime.set_global("Actor", Value::Class(ClassRef::new("Actor")));
    IndexCaches::from_globals(&runtime.globals())
}

fn populated_world() -> (ScriptRuntime, IndexCaches, PersistentRegistry) {
    let mut runtime = ScriptRuntime::new();
    let caches = boot_program(&mut runtime);
    let Value::Class(actor) = runtime.get_global("Actor") else {
        unreachable!("boot_program defines Actor");
    };
    let manny = runtime.instantiate(&actor);
    manny.set(runtime.string("name"), runtime.string("Manny"));
    manny.set(runtime.string("hp"), Value::Integer(3));
    runtime.set_global("manny", Value::Instance(manny.clone()));
    let party = runtime.create_array(0);
    party.push(Value::Instance(manny));
    runtime.set_global("party", Value::Array(party));

    let mut registry = PersistentRegistry::new();
    registry.set(RegistryScope::Session, "chapter", RuntimeValue::Int(2));
    registry.set(
        RegistryScope::Session,
        "inventory.scythe",
        RuntimeValue::Bool(true),
    );
    (runtime, caches, registry)
}

#[test]
fn save_file_restores_globals_and_session_registry() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory for save file")?;
    let save_path = temp_dir.path().join("slots").join("slot1.gsav");

    let (runtime, caches, registry) = populated_world();
    let hooks = UserTypeHooks::new();
    let stats = save_game(
        &save_path,
        &runtime,
        &registry,
        &SaveContext {
            caches: &caches,
            hooks: &hooks,
        },
    )?;
    assert_eq!(stats.instances, 1);
    assert!(save_path.is_file());

    let mut restored = ScriptRuntime::new();
    let restored_caches = boot_program(&mut restored);
    let mut restored_registry = PersistentRegistry::new();
    let outcome = load_game(
        &save_path,
        &mut restored,
        &mut restored_registry,
        &SaveContext {
            caches: &restored_caches,
            hooks: &hooks,
        },
    )?;
    assert!(outcome.unresolved.is_empty());

    let Value::Instance(manny) = restored.get_global("manny") else {
        panic!("manny should be restored as an instance");
    };
    assert_eq!(manny.get_str("name").as_str(), Some("Manny"));
    assert_eq!(manny.get_str("hp").as_int(), Some(3));
    let party = restored.get_global("party");
    let first = party.as_array().map(|party| party.get(0));
    assert!(matches!(first, Some(Value::Instance(member)) if member.ptr_eq(&manny)));

    assert_eq!(
        restored_registry.read_int(RegistryScope::Session, "chapter"),
        Some(2)
    );
    assert_eq!(
        restored_registry.read_bool(RegistryScope::Session, "inventory.scythe"),
        Some(true)
    );
    Ok(())
}

#[test]
fn corrupt_save_keeps_current_state() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory for save file")?;
    let save_path = temp_dir.path().join("broken.gsav");

    let (runtime, caches, registry) = populated_world();
    let hooks = UserTypeHooks::new();
    let context = SaveContext {
        caches: &caches,
        hooks: &hooks,
    };
    save_game(&save_path, &runtime, &registry, &context)?;
    // Cut the graph payload short and reframe it so only the graph is bad.
    let bytes = fs::read(&save_path)?;
    let mut corrupt = Vec::new();
    for (header, payload) in split_envelopes(&bytes)? {
        let payload = match header.kind {
            PayloadKind::ObjectGraph => &payload[..payload.len() / 2],
            PayloadKind::Registry => payload,
        };
        corrupt.extend(encode_payload(header.kind, payload)?);
    }
    fs::write(&save_path, &corrupt)?;

    let mut current = ScriptRuntime::new();
    let current_caches = boot_program(&mut current);
    let title = current.string("Year 1");
    current.set_global("chapter_title", title);
    let mut current_registry = PersistentRegistry::new();
    current_registry.set(RegistryScope::Session, "chapter", RuntimeValue::Int(1));

    let result = load_game(
        &save_path,
        &mut current,
        &mut current_registry,
        &SaveContext {
            caches: &current_caches,
            hooks: &hooks,
        },
    );
    assert!(result.is_err());
    assert!(current.get_global("manny").is_null());
    assert_eq!(current.get_global("chapter_title").as_str(), Some("Year 1"));
    assert_eq!(
        current_registry.read_int(RegistryScope::Session, "chapter"),
        Some(1)
    );
    Ok(())
}

#[test]
fn scripts_persist_options_between_runs() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory for registry file")?;
    let registry_path = temp_dir.path().join("grim.registry");

    let registry = Rc::new(RefCell::new(PersistentRegistry::new()));
    {
        let lua = Lua::new();
        install_registry(&lua, registry.clone())?;
        lua.load(
            r#"
            Registry.set_persistent("options.subtitles", true)
            Registry.set_persistent("options.volume", 0.5)
            Registry.set("scratch", "session only")
            "#,
        )
        .exec()?;
    }
    assert!(save_persistent(&registry_path, &mut registry.borrow_mut())?);
    assert!(!save_persistent(&registry_path, &mut registry.borrow_mut())?);

    let reloaded = Rc::new(RefCell::new(PersistentRegistry::new()));
    load_persistent(&registry_path, &mut reloaded.borrow_mut())?;
    let lua = Lua::new();
    install_registry(&lua, reloaded.clone())?;
    let (subtitles, volume, scratch): (bool, f64, Option<String>) = lua
        .load(
            r#"
            return Registry.get_persistent("options.subtitles"),
                Registry.get_persistent("options").volume,
                Registry.get("scratch")
            "#,
        )
        .eval()?;
    assert!(subtitles);
    assert_eq!(volume, 0.5);
    assert_eq!(scratch, None);
    assert!(!reloaded.borrow().is_dirty());
    Ok(())
}

#[test]
fn missing_persistent_file_is_empty_registry() -> Result<()> {
    let temp_dir = tempdir()?;
    let mut registry = PersistentRegistry::new();
    load_persistent(&temp_dir.path().join("absent.registry"), &mut registry)?;
    assert!(registry.get(RegistryScope::Persistent, "anything").is_null());
    Ok(())
}

#[test]
fn cli_inspects_save_files() -> Result<()> {
    let temp_dir = tempdir().context("creating temporary directory for save file")?;
    let save_path = temp_dir.path().join("slot2.gsav");
    let (runtime, caches, registry) = populated_world();
    let hooks = UserTypeHooks::new();
    save_game(
        &save_path,
        &runtime,
        &registry,
        &SaveContext {
            caches: &caches,
            hooks: &hooks,
        },
    )?;
    let save_str = save_path
        .to_str()
        .context("save path is not valid UTF-8")?;

    let output = Command::new(env!("CARGO_BIN_EXE_grim_save"))
        .args(["inspect", save_str])
        .output()
        .context("executing grim_save inspect")?;
    assert!(output.status.success(), "grim_save exited with {:?}", output.status);
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("object graph"), "missing graph summary: {text}");
    assert!(text.contains("root table: 0"), "missing root index: {text}");
    assert!(text.contains("classes: Actor"), "missing class names: {text}");
    assert!(text.contains("registry"), "missing registry summary: {text}");

    let output = Command::new(env!("CARGO_BIN_EXE_grim_save"))
        .args(["inspect", save_str, "--json"])
        .output()
        .context("executing grim_save inspect --json")?;
    assert!(output.status.success(), "grim_save exited with {:?}", output.status);
    let reports: JsonValue = serde_json::from_slice(&output.stdout)?;
    assert_eq!(reports[0]["payload"], "object_graph");
    assert_eq!(reports[0]["header"]["kind"], 1);
    assert_eq!(reports[1]["header"]["kind"], 2);
    assert_eq!(reports[0]["summary"]["instances"], 1);
    assert_eq!(reports[1]["payload"], "registry");
    assert_eq!(reports[1]["value"]["chapter"], 2);

    let output = Command::new(env!("CARGO_BIN_EXE_grim_save"))
        .args(["registry", save_str, "--get", "inventory.scythe"])
        .output()
        .context("executing grim_save registry")?;
    assert!(output.status.success(), "grim_save exited with {:?}", output.status);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
    Ok(())
}
