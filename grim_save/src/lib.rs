//! Save-file plumbing around `grim_persist`.
//!
//! Payloads are framed with a small header ([`envelope`]), a whole game
//! snapshot is the globals graph plus the session registry ([`snapshot`]),
//! and scripts reach the registry through [`lua_registry`].

pub mod envelope;
pub mod lua_registry;
pub mod report;
pub mod snapshot;

pub use envelope::{
    decode_envelope, encode_payload, split_envelopes, EnvelopeError, PayloadKind, SaveHeader,
    ENVELOPE_VERSION, HEADER_LEN, HEADER_MAGIC,
};
pub use lua_registry::install_registry;
pub use snapshot::{
    capture, load_game, load_persistent, restore, save_game, save_persistent, SaveContext,
};
