//! Whole-game save files: the script globals graph plus the session registry,
//! and a separate file for the persistent registry scope.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use grim_persist::{
    GraphDeserializer, GraphSerializer, GraphStats, IndexCaches, LoadOutcome, PersistentRegistry,
    RegistryScope, ScriptRuntime, SerializeOptions, UserTypeHooks,
};

use crate::envelope::{decode_envelope, encode_payload, split_envelopes, PayloadKind};

/// What the save pipeline needs from the host besides the runtime itself.
pub struct SaveContext<'a> {
    pub caches: &'a IndexCaches,
    pub hooks: &'a UserTypeHooks,
}

/// Serializes the runtime's globals and the session registry into one buffer.
pub fn capture(
    runtime: &ScriptRuntime,
    registry: &PersistentRegistry,
    context: &SaveContext<'_>,
) -> Result<(Vec<u8>, GraphStats)> {
    let graph = GraphSerializer::new(context.caches, context.hooks)
        .with_options(SerializeOptions {
            merge_root_into_globals: true,
        })
        .serialize_root(&runtime.globals())
        .context("failed to serialize script globals")?;
    let session = registry
        .save_scope(RegistryScope::Session)
        .context("failed to encode session registry")?;

    let mut out = encode_payload(PayloadKind::ObjectGraph, &graph.bytes)?;
    out.extend(encode_payload(PayloadKind::Registry, &session)?);
    log::debug!(
        "[grim_save] captured {} bytes ({} graph, {} registry)",
        out.len(),
        graph.bytes.len(),
        session.len()
    );
    Ok((out, graph.stats))
}

/// Restores a buffer produced by [`capture`].
///
/// The registry is only replaced once the graph has loaded, so a corrupt
/// file leaves the session registry as it was.
pub fn restore(
    runtime: &mut ScriptRuntime,
    registry: &mut PersistentRegistry,
    context: &SaveContext<'_>,
    bytes: &[u8],
) -> Result<LoadOutcome> {
    let mut graph = None;
    let mut session = None;
    for (header, payload) in split_envelopes(bytes).context("malformed save file")? {
        let slot = match header.kind {
            PayloadKind::ObjectGraph => &mut graph,
            PayloadKind::Registry => &mut session,
        };
        if slot.replace(payload).is_some() {
            bail!("save file holds more than one {:?} payload", header.kind);
        }
    }
    let graph = graph.ok_or_else(|| anyhow!("save file has no object graph"))?;
    let session = session.ok_or_else(|| anyhow!("save file has no session registry"))?;

    let mut staged = PersistentRegistry::new();
    staged
        .load_scope(RegistryScope::Session, session)
        .context("failed to decode session registry")?;

    let outcome = GraphDeserializer::new(runtime, context.caches, context.hooks)
        .unserialize(graph)
        .context("failed to restore script globals")?;
    for name in &outcome.unresolved {
        log::warn!("[grim_save] restored with gaps: {name}");
    }

    registry.replace_scope(RegistryScope::Session, staged.take_scope(RegistryScope::Session));
    Ok(outcome)
}

pub fn save_game(
    path: &Path,
    runtime: &ScriptRuntime,
    registry: &PersistentRegistry,
    context: &SaveContext<'_>,
) -> Result<GraphStats> {
    let (bytes, stats) = capture(runtime, registry, context)?;
    write_file(path, &bytes)?;
    Ok(stats)
}

pub fn load_game(
    path: &Path,
    runtime: &mut ScriptRuntime,
    registry: &mut PersistentRegistry,
    context: &SaveContext<'_>,
) -> Result<LoadOutcome> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read save file: {}", path.display()))?;
    restore(runtime, registry, context, &bytes)
        .with_context(|| format!("failed to load save file: {}", path.display()))
}

/// Writes the persistent scope if it changed since the last save.
pub fn save_persistent(path: &Path, registry: &mut PersistentRegistry) -> Result<bool> {
    if !registry.is_dirty() {
        return Ok(false);
    }
    let payload = registry
        .save_scope(RegistryScope::Persistent)
        .context("failed to encode persistent registry")?;
    write_file(path, &encode_payload(PayloadKind::Registry, &payload)?)?;
    registry.mark_clean();
    Ok(true)
}

/// Loads the persistent scope; a missing file leaves it empty.
pub fn load_persistent(path: &Path, registry: &mut PersistentRegistry) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read registry file: {}", path.display()))?;
    let (header, payload) = decode_envelope(&bytes)?;
    if header.kind != PayloadKind::Registry {
        bail!("{} does not hold a registry payload", path.display());
    }
    registry
        .load_scope(RegistryScope::Persistent, payload)
        .with_context(|| format!("failed to decode registry file: {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create save directory: {}", parent.display())
            })?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("failed to write save file: {}", path.display()))
}
