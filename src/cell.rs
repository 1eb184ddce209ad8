//! Cell identity and descriptors
//!
//! The conductor identifies a running cell by the pair (DNA hash, agent
//! public key). This module wraps that pair as [`CellAddress`] with a stable
//! string encoding — the only canonical key into the registry maps — plus the
//! descriptor types returned by the conductor's app-info operation.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ProxyError, Result};
use crate::hcl::Hcl;

/// Separator between the two encoded hashes in the canonical string form.
const CELL_ADDRESS_SEPARATOR: &str = "||";

/// The conductor's low-level identifier for a running cell.
///
/// Opaque bytes in practice; compared and keyed through its canonical string
/// encoding, which is stable for the process lifetime.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    /// DNA hash bytes
    pub dna_hash: Vec<u8>,
    /// Agent public key bytes
    pub agent_key: Vec<u8>,
}

impl CellAddress {
    pub fn new(dna_hash: Vec<u8>, agent_key: Vec<u8>) -> Self {
        Self { dna_hash, agent_key }
    }

    /// Canonical string form: `<dna b64>||<agent b64>`.
    pub fn str(&self) -> String {
        format!(
            "{}{}{}",
            BASE64_URL_SAFE_NO_PAD.encode(&self.dna_hash),
            CELL_ADDRESS_SEPARATOR,
            BASE64_URL_SAFE_NO_PAD.encode(&self.agent_key),
        )
    }

    /// Parse the canonical string form back into an address.
    pub fn from_str(s: &str) -> Result<Self> {
        let (dna, agent) = s
            .split_once(CELL_ADDRESS_SEPARATOR)
            .ok_or_else(|| ProxyError::Wire(format!("Bad cell address string: {s}")))?;
        let dna_hash = BASE64_URL_SAFE_NO_PAD
            .decode(dna)
            .map_err(|e| ProxyError::Wire(format!("Bad cell address encoding: {e}")))?;
        let agent_key = BASE64_URL_SAFE_NO_PAD
            .decode(agent)
            .map_err(|e| ProxyError::Wire(format!("Bad cell address encoding: {e}")))?;
        Ok(Self { dna_hash, agent_key })
    }
}

impl fmt::Debug for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.str();
        let shown: String = s.chars().take(12).collect();
        write!(f, "CellAddress({shown}…)")
    }
}

/// DNA modifiers applied when cloning a cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnaModifiers {
    /// Network partition seed; distinct seeds put clones on distinct networks
    pub network_seed: String,
    /// Optional DNA properties override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// The original (non-clone) cell filling a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedCell {
    pub cell_id: CellAddress,
    /// Display name; by convention the base role name
    pub name: String,
}

/// A runtime-created clone of a role's cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonedCell {
    pub cell_id: CellAddress,
    /// Clone id assigned by the conductor (`"<baseRoleName>.<index>"`)
    pub clone_id: String,
    /// Human label for the clone
    pub name: String,
    pub enabled: bool,
    pub dna_modifiers: DnaModifiers,
}

/// One cell descriptor as reported by app-info.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellInfo {
    Provisioned(ProvisionedCell),
    Cloned(ClonedCell),
    /// A cell not yet provisioned; carries no usable identity
    Stem { name: Option<String> },
}

/// Either side of the provisioned/cloned split.
#[derive(Debug, Clone)]
pub enum AnyCell {
    Provisioned(ProvisionedCell),
    Cloned(ClonedCell),
}

impl AnyCell {
    pub fn address(&self) -> &CellAddress {
        match self {
            AnyCell::Provisioned(c) => &c.cell_id,
            AnyCell::Cloned(c) => &c.cell_id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AnyCell::Provisioned(c) => &c.name,
            AnyCell::Cloned(c) => &c.name,
        }
    }
}

/// A resolved cell bound to the locator it was resolved through.
#[derive(Debug, Clone)]
pub struct Cell {
    pub hcl: Hcl,
    pub cell: AnyCell,
}

impl Cell {
    pub fn new(hcl: Hcl, cell: AnyCell) -> Self {
        Self { hcl, cell }
    }

    pub fn address(&self) -> &CellAddress {
        self.cell.address()
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn as_cloned(&self) -> Option<&ClonedCell> {
        match &self.cell {
            AnyCell::Cloned(c) => Some(c),
            AnyCell::Provisioned(_) => None,
        }
    }

    pub fn as_provisioned(&self) -> Option<&ProvisionedCell> {
        match &self.cell {
            AnyCell::Provisioned(c) => Some(c),
            AnyCell::Cloned(_) => None,
        }
    }
}

/// All cells filling one role of one hApp: exactly one provisioned cell plus
/// any number of clones, keyed by clone id.
#[derive(Debug, Clone)]
pub struct CellsForRole {
    pub provisioned: ProvisionedCell,
    pub clones: HashMap<String, ClonedCell>,
}
