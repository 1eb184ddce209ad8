//! Signals pushed by the conductor
//!
//! The conductor can push a signal at any time, tagged with the low-level
//! address of the cell that emitted it. Payloads are classified structurally
//! into system pulses (lifecycle notifications emitted by the zome framework)
//! and application signals; anything else lands in the Unknown bucket. The
//! classification drives log partitioning only, never delivery.

pub mod journal;

pub use journal::{SignalDump, SignalJournal, SignalLog};

use serde::{Deserialize, Serialize};

use crate::cell::CellAddress;

/// Reserved discriminant key marking a system pulse payload.
const SYSTEM_DISCRIMINANT: &str = "System";

/// Keys marking an application signal envelope (`{ from, pulses }`).
const APP_FROM_KEY: &str = "from";
const APP_PULSES_KEY: &str = "pulses";

/// A signal pushed by the conductor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSignal {
    /// The emitting cell
    pub cell_address: CellAddress,
    /// The zome that emitted the signal
    pub zome_name: String,
    /// Raw payload as sent by the zome
    pub payload: serde_json::Value,
}

/// Structural classification of a signal payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    /// System pulse emitted by the zome framework
    System,
    /// Application-level signal envelope
    App,
    /// Anything else
    Unknown,
}

/// Classify a signal payload by shape.
///
/// A payload is a system pulse when it is a non-null, non-array object
/// carrying the reserved `"System"` key; an application signal when it
/// carries the `{ from, pulses }` envelope; unknown otherwise.
pub fn classify(payload: &serde_json::Value) -> SignalType {
    let Some(object) = payload.as_object() else {
        return SignalType::Unknown;
    };
    if object.contains_key(APP_FROM_KEY) && object.contains_key(APP_PULSES_KEY) {
        return SignalType::App;
    }
    if object.contains_key(SYSTEM_DISCRIMINANT) {
        return SignalType::System;
    }
    SignalType::Unknown
}

/// System pulses emitted around zome lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemSignalProtocol {
    PostCommitNewStart { app_entry_type: String },
    PostCommitNewEnd { app_entry_type: String, succeeded: bool },
    PostCommitDeleteStart { app_entry_type: String },
    PostCommitDeleteEnd { app_entry_type: String, succeeded: bool },
    SelfCallStart { zome_name: String, fn_name: String },
    SelfCallEnd { zome_name: String, fn_name: String, succeeded: bool },
}
