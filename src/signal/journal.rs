//! Signal journal
//!
//! Append-only record of every signal received on a connection, together
//! with the address→locator map and the display names the dumps resolve
//! through. Shared behind an `Arc` between the registry and the cell proxies
//! so a failing call can dump its cell's signal history without a
//! back-reference into the registry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::warn;

use super::{classify, AppSignal, SignalType};
use crate::cell::CellAddress;
use crate::hcl::Hcl;
use crate::pretty::{pretty_date, truncate_payload};

/// One journaled signal.
#[derive(Debug, Clone)]
pub struct SignalLog {
    pub ts: DateTime<Utc>,
    /// Canonical string of the emitting cell's address
    pub cell_address: String,
    pub zome_name: String,
    pub signal_type: SignalType,
    pub payload: serde_json::Value,
}

/// One rendered dump row.
#[derive(Debug, Clone)]
pub struct SignalDumpRow {
    pub timestamp: String,
    /// Display names of the emitting cell, when known
    pub cell: String,
    pub zome: String,
    pub payload: String,
}

/// A signal dump, partitioned by classification.
#[derive(Debug, Default)]
pub struct SignalDump {
    pub system: Vec<SignalDumpRow>,
    pub app: Vec<SignalDumpRow>,
    pub unknown: Vec<SignalDumpRow>,
}

/// Append-only signal log plus the location labels used to render it.
#[derive(Default)]
pub struct SignalJournal {
    /// All signals received, in arrival order
    logs: RwLock<Vec<SignalLog>>,
    /// cell address string → locators known to refer to that cell
    locations: DashMap<String, Vec<Hcl>>,
    /// locator string → display name
    names: DashMap<String, String>,
}

impl SignalJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signal with its structural classification.
    pub fn record(&self, signal: &AppSignal) -> SignalType {
        let signal_type = classify(&signal.payload);
        self.logs.write().push(SignalLog {
            ts: Utc::now(),
            cell_address: signal.cell_address.str(),
            zome_name: signal.zome_name.clone(),
            signal_type,
            payload: signal.payload.clone(),
        });
        signal_type
    }

    /// Register a locator for a cell address. Appends; a cell may be known
    /// under several locators.
    pub fn register_location(&self, address: &CellAddress, hcl: Hcl) {
        self.locations.entry(address.str()).or_default().push(hcl);
    }

    /// All locators known to refer to a cell address.
    pub fn locations(&self, address: &CellAddress) -> Vec<Hcl> {
        self.locations
            .get(&address.str())
            .map(|hcls| hcls.clone())
            .unwrap_or_default()
    }

    /// Record the display name for a locator.
    pub fn set_name(&self, hcl: &Hcl, name: impl Into<String>) {
        self.names.insert(hcl.to_string(), name.into());
    }

    /// Display name recorded for a locator, if any.
    pub fn name(&self, hcl: &Hcl) -> Option<String> {
        self.names.get(&hcl.to_string()).map(|n| n.clone())
    }

    /// Number of journaled signals.
    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }

    /// Snapshot of the journal entries for one cell.
    pub fn logs_for_cell(&self, address: &CellAddress) -> Vec<SignalLog> {
        let key = address.str();
        self.logs
            .read()
            .iter()
            .filter(|log| log.cell_address == key)
            .cloned()
            .collect()
    }

    /// Dump the journal, optionally filtered to one cell and one zome,
    /// partitioned into system/app/unknown tables. Rows are also emitted
    /// through tracing for console consumption. Read-only.
    pub fn dump(&self, address: Option<&CellAddress>, zome_name: Option<&str>) -> SignalDump {
        let address_key = address.map(|a| a.str());
        let logs = self.logs.read();
        let mut dump = SignalDump::default();
        for log in logs.iter() {
            if let Some(ref key) = address_key {
                if &log.cell_address != key {
                    continue;
                }
            }
            if let Some(zome) = zome_name {
                if log.zome_name != zome {
                    continue;
                }
            }
            let row = SignalDumpRow {
                timestamp: pretty_date(log.ts),
                cell: self.display_names(&log.cell_address),
                zome: log.zome_name.clone(),
                payload: truncate_payload(&log.payload, 160),
            };
            match log.signal_type {
                SignalType::System => dump.system.push(row),
                SignalType::App => dump.app.push(row),
                SignalType::Unknown => dump.unknown.push(row),
            }
        }
        warn!(
            system = dump.system.len(),
            app = dump.app.len(),
            unknown = dump.unknown.len(),
            "Signal dump"
        );
        for row in dump.system.iter().chain(&dump.app).chain(&dump.unknown) {
            warn!(ts = %row.timestamp, cell = %row.cell, zome = %row.zome, payload = %row.payload);
        }
        dump
    }

    /// Resolve the display names of a cell from its registered locators.
    fn display_names(&self, cell_address: &str) -> String {
        let Some(hcls) = self.locations.get(cell_address) else {
            return cell_address.chars().take(12).collect();
        };
        let names: Vec<String> = hcls
            .iter()
            .map(|hcl| self.name(hcl).unwrap_or_else(|| hcl.to_string()))
            .collect();
        names.join(", ")
    }
}
