//! In-process conductor double for tests
//!
//! Deterministic [`ConductorTransport`] implementation: roles are seeded up
//! front, zome calls echo their payload after a configurable delay, clones
//! get sequential ids. Counts every host-facing call so precondition tests
//! can assert that failing operations made zero transport calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::{AppInfo, CallZomeRequest, ConductorTransport, CreateCloneCellRequest, SignalSink};
use crate::cell::{CellAddress, CellInfo, ClonedCell, ProvisionedCell};
use crate::error::{ProxyError, Result};
use crate::hcl::create_clone_name;
use crate::signal::AppSignal;

/// One dispatched zome call, with its execution window.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub zome_name: String,
    pub fn_name: String,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Default)]
struct MockState {
    /// app id → role → descriptors
    apps: HashMap<String, HashMap<String, Vec<CellInfo>>>,
    /// app id → role → clones created so far
    clone_counts: HashMap<(String, String), u32>,
    dispatches: Vec<Dispatch>,
    sink: Option<SignalSink>,
}

pub struct MockConductor {
    state: Mutex<MockState>,
    /// Simulated execution time per zome call
    pub call_delay: Duration,
    /// Total host-facing calls made through this transport
    host_calls: AtomicUsize,
    /// When set, every zome call fails
    pub fail_calls: AtomicBool,
    next_dna_byte: AtomicU8,
}

impl MockConductor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            call_delay: Duration::from_millis(0),
            host_calls: AtomicUsize::new(0),
            fail_calls: AtomicBool::new(false),
            next_dna_byte: AtomicU8::new(1),
        }
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    fn mint_address(&self) -> CellAddress {
        let byte = self.next_dna_byte.fetch_add(1, Ordering::SeqCst);
        CellAddress::new(vec![byte; 39], vec![0xAA; 39])
    }

    /// Seed a role with its provisioned cell; returns the minted address.
    pub fn add_role(&self, app_id: &str, role: &str) -> CellAddress {
        let address = self.mint_address();
        let cell = CellInfo::Provisioned(ProvisionedCell {
            cell_id: address.clone(),
            name: role.to_string(),
        });
        self.state
            .lock()
            .apps
            .entry(app_id.to_string())
            .or_default()
            .entry(role.to_string())
            .or_default()
            .push(cell);
        address
    }

    /// Seed a role without a provisioned cell (stem only).
    pub fn add_stem_role(&self, app_id: &str, role: &str) {
        self.state
            .lock()
            .apps
            .entry(app_id.to_string())
            .or_default()
            .entry(role.to_string())
            .or_default()
            .push(CellInfo::Stem { name: None });
    }

    pub fn host_call_count(&self) -> usize {
        self.host_calls.load(Ordering::SeqCst)
    }

    /// Execution windows of every dispatched zome call, in dispatch order.
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.state.lock().dispatches.clone()
    }

    /// Push a signal through the registered sink.
    pub fn push_signal(&self, signal: AppSignal) {
        let state = self.state.lock();
        if let Some(ref sink) = state.sink {
            sink(signal);
        }
    }
}

#[async_trait]
impl ConductorTransport for MockConductor {
    async fn call_zome(
        &self,
        request: CallZomeRequest,
        _timeout: Duration,
    ) -> Result<serde_json::Value> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        self.state.lock().dispatches.push(Dispatch {
            zome_name: request.zome_name.clone(),
            fn_name: request.fn_name.clone(),
            started,
            finished: Instant::now(),
        });
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(ProxyError::Transport("mock call failure".to_string()));
        }
        if request.fn_name == "entry_defs" {
            return Ok(serde_json::json!({
                "Defs": [
                    {"id": {"App": "post"}, "visibility": "Public"},
                    {"id": {"App": "draft"}, "visibility": "Private"},
                ]
            }));
        }
        Ok(request.payload)
    }

    async fn app_info(&self, app_id: &str) -> Result<AppInfo> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let cell_info = state
            .apps
            .get(app_id)
            .cloned()
            .ok_or_else(|| ProxyError::UnknownApp(app_id.to_string()))?;
        Ok(AppInfo {
            app_id: app_id.to_string(),
            cell_info,
        })
    }

    async fn create_clone_cell(&self, request: CreateCloneCellRequest) -> Result<ClonedCell> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);
        let address = self.mint_address();
        let mut state = self.state.lock();
        let key = (request.app_id.clone(), request.role_name.clone());
        let counter = state.clone_counts.entry(key).or_insert(0);
        let index = *counter;
        *counter += 1;
        let clone_id = create_clone_name(&request.role_name, index);
        let cloned = ClonedCell {
            cell_id: address,
            clone_id: clone_id.clone(),
            name: request.name.unwrap_or_else(|| clone_id.clone()),
            enabled: true,
            dna_modifiers: request.modifiers,
        };
        state
            .apps
            .entry(request.app_id)
            .or_default()
            .entry(request.role_name)
            .or_default()
            .push(CellInfo::Cloned(cloned.clone()));
        Ok(cloned)
    }

    async fn enable_clone_cell(&self, app_id: &str, clone_id: &str) -> Result<ClonedCell> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let roles = state
            .apps
            .get(app_id)
            .ok_or_else(|| ProxyError::UnknownApp(app_id.to_string()))?;
        for cells in roles.values() {
            for info in cells {
                if let CellInfo::Cloned(cloned) = info {
                    if cloned.clone_id == clone_id {
                        let mut enabled = cloned.clone();
                        enabled.enabled = true;
                        return Ok(enabled);
                    }
                }
            }
        }
        Err(ProxyError::UnknownClone(clone_id.to_string()))
    }

    async fn disable_clone_cell(&self, _app_id: &str, _clone_id: &str) -> Result<()> {
        self.host_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_signal_sink(&self, sink: SignalSink) {
        self.state.lock().sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_app_info_and_clone_ids() {
        let mock = MockConductor::new();
        mock.add_role("app-1", "role-a");

        let info = mock.app_info("app-1").await.unwrap();
        assert_eq!(info.cell_info["role-a"].len(), 1);

        let request = CreateCloneCellRequest {
            app_id: "app-1".to_string(),
            role_name: "role-a".to_string(),
            modifiers: Default::default(),
            membrane_proof: None,
            name: None,
        };
        let first = mock.create_clone_cell(request.clone()).await.unwrap();
        let second = mock.create_clone_cell(request).await.unwrap();
        assert_eq!(first.clone_id, "role-a.0");
        assert_eq!(second.clone_id, "role-a.1");
        assert_ne!(first.cell_id, second.cell_id);
        assert_eq!(mock.host_call_count(), 3);
    }
}
