//! Transport seam to the conductor
//!
//! Everything host-facing goes through [`ConductorTransport`]: zome calls,
//! app-info, clone lifecycle requests and the single process-wide signal
//! sink. The proxy layer depends only on this trait; [`ConductorSession`]
//! is the real websocket implementation.

pub mod protocol;
pub mod ws;

#[cfg(test)]
pub(crate) mod mock;

pub use ws::ConductorSession;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::cell::{CellAddress, CellInfo, ClonedCell, DnaModifiers};
use crate::error::Result;
use crate::signal::AppSignal;

/// Process-wide signal sink registered by the registry.
pub type SignalSink = Box<dyn Fn(AppSignal) + Send + Sync>;

/// A zome call request as dispatched to the conductor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallZomeRequest {
    /// Target cell
    pub cell_id: CellAddress,
    pub zome_name: String,
    pub fn_name: String,
    pub payload: serde_json::Value,
    /// Capability secret, when the call is not covered by an open grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_secret: Option<Vec<u8>>,
    /// Calling agent; by construction the cell's own agent key
    pub provenance: Vec<u8>,
}

/// App-info response: every role's cell descriptors for one hApp.
#[derive(Debug, Clone, Default)]
pub struct AppInfo {
    pub app_id: String,
    /// base role name → descriptors (provisioned, clones, stems)
    pub cell_info: HashMap<String, Vec<CellInfo>>,
}

/// Request to create a clone cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCloneCellRequest {
    pub app_id: String,
    pub role_name: String,
    pub modifiers: DnaModifiers,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub membrane_proof: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The host-facing operations this crate consumes.
///
/// Implementations must be shareable across tasks; all registry and proxy
/// state lives behind `Arc<dyn ConductorTransport>`.
#[async_trait]
pub trait ConductorTransport: Send + Sync {
    /// Execute a zome call. The timeout is enforced transport-side.
    async fn call_zome(&self, request: CallZomeRequest, timeout: Duration) -> Result<serde_json::Value>;

    /// Fetch the cell descriptors of an installed hApp.
    async fn app_info(&self, app_id: &str) -> Result<AppInfo>;

    /// Ask the conductor to create a clone cell.
    async fn create_clone_cell(&self, request: CreateCloneCellRequest) -> Result<ClonedCell>;

    /// Re-enable a disabled clone cell.
    async fn enable_clone_cell(&self, app_id: &str, clone_id: &str) -> Result<ClonedCell>;

    /// Disable a clone cell. The registry keeps its record.
    async fn disable_clone_cell(&self, app_id: &str, clone_id: &str) -> Result<()>;

    /// Register the process-wide signal sink. A later registration replaces
    /// an earlier one.
    fn set_signal_sink(&self, sink: SignalSink);
}
