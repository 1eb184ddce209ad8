//! Connection-level registry
//!
//! One [`AppProxy`] per conductor connection. It owns the authoritative
//! mapping between low-level cell addresses and the locators that refer to
//! them, caches at most one [`CellProxy`] per address, and fans incoming
//! signals out to registered listeners.
//!
//! The registry installs itself as the transport's signal sink on
//! construction, so signals arriving before any listener is registered are
//! still journaled.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cell::{
    AnyCell, Cell, CellAddress, CellInfo, CellsForRole, ClonedCell,
};
use crate::config::RuntimeConfig;
use crate::error::{ProxyError, Result};
use crate::hcl::{create_clone_name, destructure_clone_id, Hcl};
use crate::proxy::cell::CellProxy;
use crate::signal::{AppSignal, SignalDump, SignalJournal};
use crate::transport::{CallZomeRequest, ConductorTransport, CreateCloneCellRequest};

/// Listener bucket key for handlers not tied to a locator.
const ALL_CELLS: &str = "__all";

/// Signal listener callback.
pub type SignalHandler = Arc<dyn Fn(&AppSignal) + Send + Sync>;

/// Handle returned by [`AppProxy::add_signal_handler`]. Removes exactly the
/// registration it was issued for; calling it twice is harmless.
pub struct SignalUnsubscriber {
    handlers: Arc<DashMap<String, Vec<(u64, SignalHandler)>>>,
    key: String,
    id: u64,
}

impl SignalUnsubscriber {
    pub fn unsubscribe(&self) {
        if let Some(mut bucket) = self.handlers.get_mut(&self.key) {
            bucket.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Registry of cells, proxies and signal listeners for one connection.
pub struct AppProxy {
    config: RuntimeConfig,
    transport: Arc<dyn ConductorTransport>,
    journal: Arc<SignalJournal>,
    /// app id → base role name → cells
    cells_by_app: DashMap<String, HashMap<String, CellsForRole>>,
    /// locator string or `"__all"` → listeners in registration order
    handlers: Arc<DashMap<String, Vec<(u64, SignalHandler)>>>,
    /// cell address string → the one proxy for that cell
    cell_proxies: DashMap<String, Arc<CellProxy>>,
    next_handler_id: AtomicU64,
}

impl AppProxy {
    pub fn new(config: RuntimeConfig, transport: Arc<dyn ConductorTransport>) -> Arc<Self> {
        let proxy = Arc::new(Self {
            config,
            transport,
            journal: Arc::new(SignalJournal::new()),
            cells_by_app: DashMap::new(),
            handlers: Arc::new(DashMap::new()),
            cell_proxies: DashMap::new(),
            next_handler_id: AtomicU64::new(1),
        });
        let weak = Arc::downgrade(&proxy);
        proxy.transport.set_signal_sink(Box::new(move |signal| {
            if let Some(proxy) = weak.upgrade() {
                proxy.on_signal(&signal);
            }
        }));
        proxy
    }

    pub fn journal(&self) -> &Arc<SignalJournal> {
        &self.journal
    }

    /// Fetch one role's cells from the conductor and cache them.
    ///
    /// Stem descriptors are skipped. A duplicate clone id keeps the later
    /// descriptor. A role without a provisioned cell is unusable.
    pub async fn fetch_cells(&self, app_id: &str, base_role_name: &str) -> Result<CellsForRole> {
        let info = self.transport.app_info(app_id).await?;
        let entries = info
            .cell_info
            .get(base_role_name)
            .ok_or_else(|| ProxyError::UnknownRole {
                app: app_id.to_string(),
                role: base_role_name.to_string(),
            })?;

        let mut provisioned = None;
        let mut clones: HashMap<String, ClonedCell> = HashMap::new();
        for entry in entries {
            match entry {
                CellInfo::Provisioned(cell) => {
                    if provisioned.is_some() {
                        warn!(
                            app = app_id,
                            role = base_role_name,
                            "Duplicate provisioned cell, keeping the first"
                        );
                    } else {
                        provisioned = Some(cell.clone());
                    }
                }
                CellInfo::Cloned(cell) => {
                    if clones.contains_key(&cell.clone_id) {
                        error!(
                            app = app_id,
                            role = base_role_name,
                            clone_id = %cell.clone_id,
                            "Duplicate clone id, keeping the later descriptor"
                        );
                    }
                    clones.insert(cell.clone_id.clone(), cell.clone());
                }
                CellInfo::Stem { name } => {
                    debug!(app = app_id, role = base_role_name, name = ?name, "Skipping stem cell");
                }
            }
        }

        let provisioned = provisioned
            .ok_or_else(|| ProxyError::NoOriginalInstance(base_role_name.to_string()))?;
        let cells = CellsForRole {
            provisioned,
            clones,
        };

        info!(
            app = app_id,
            role = base_role_name,
            clones = cells.clones.len(),
            "Fetched cells for role"
        );
        self.cells_by_app
            .entry(app_id.to_string())
            .or_default()
            .insert(base_role_name.to_string(), cells.clone());
        Ok(cells)
    }

    /// Resolve a locator against the cached cells.
    pub fn get_cell(&self, hcl: &Hcl) -> Result<Cell> {
        let app = self
            .cells_by_app
            .get(&hcl.app_id)
            .ok_or_else(|| ProxyError::UnknownApp(hcl.app_id.clone()))?;
        let cells = app
            .get(&hcl.base_role_name)
            .ok_or_else(|| ProxyError::UnknownRole {
                app: hcl.app_id.clone(),
                role: hcl.base_role_name.clone(),
            })?;

        let any = if let Some(index) = hcl.clone_index {
            let clone_id = create_clone_name(&hcl.base_role_name, index);
            let clone = cells
                .clones
                .get(&clone_id)
                .ok_or_else(|| ProxyError::UnknownClone(hcl.to_string()))?;
            AnyCell::Cloned(clone.clone())
        } else if let Some(ref clone_name) = hcl.clone_name {
            let clone = cells
                .clones
                .values()
                .find(|c| &c.name == clone_name)
                .ok_or_else(|| ProxyError::UnknownClone(hcl.to_string()))?;
            AnyCell::Cloned(clone.clone())
        } else {
            AnyCell::Provisioned(cells.provisioned.clone())
        };
        Ok(Cell::new(hcl.clone(), any))
    }

    /// The proxy for a locator. Pure resolution: never constructs and never
    /// registers a location, so it is safe on read-side paths.
    pub fn cell_proxy(&self, hcl: &Hcl) -> Result<Arc<CellProxy>> {
        let cell = self.get_cell(hcl)?;
        self.cell_proxy_for_address(cell.address())
    }

    /// The proxy already constructed for an address. Never constructs.
    pub fn cell_proxy_for_address(&self, address: &CellAddress) -> Result<Arc<CellProxy>> {
        self.cell_proxies
            .get(&address.str())
            .map(|p| p.clone())
            .ok_or_else(|| ProxyError::ProxyNotFound(address.str()))
    }

    /// Construct or reuse the proxy for the cell a locator resolves to, and
    /// register the locator as one of that cell's locations.
    pub fn create_cell_proxy(
        &self,
        hcl: &Hcl,
        display_name: Option<&str>,
    ) -> Result<Arc<CellProxy>> {
        let cell = self.get_cell(hcl)?;
        let address = cell.address().clone();
        let name = display_name
            .unwrap_or(hcl.base_role_name.as_str())
            .to_string();

        let proxy = self
            .cell_proxies
            .entry(address.str())
            .or_insert_with(|| {
                Arc::new(CellProxy::new(
                    self.transport.clone(),
                    cell,
                    self.journal.clone(),
                    &self.config,
                ))
            })
            .clone();

        // Location registration is a list append, one entry per call.
        self.journal.register_location(&address, hcl.clone());
        self.journal.set_name(hcl, name);
        Ok(proxy)
    }

    /// Record a freshly created clone into the cached cells for its role.
    pub fn add_clone(&self, hcl: &Hcl, cloned: &ClonedCell) -> Result<()> {
        if !hcl.is_clone() {
            return Err(ProxyError::NotAClone(hcl.to_string()));
        }
        let mut app = self
            .cells_by_app
            .get_mut(&hcl.app_id)
            .ok_or_else(|| ProxyError::UnknownApp(hcl.app_id.clone()))?;
        let cells = app
            .get_mut(&hcl.base_role_name)
            .ok_or_else(|| ProxyError::UnknownRole {
                app: hcl.app_id.clone(),
                role: hcl.base_role_name.clone(),
            })?;
        cells.clones.insert(cloned.clone_id.clone(), cloned.clone());
        Ok(())
    }

    /// Deliver one signal: locator listeners in location order, then the
    /// catch-all bucket, then journal it.
    pub fn on_signal(&self, signal: &AppSignal) {
        let locations = self.journal.locations(&signal.cell_address);
        if locations.is_empty() {
            debug!(
                cell = %signal.cell_address.str(),
                zome = %signal.zome_name,
                "Signal from a cell with no registered locator"
            );
        }
        for hcl in &locations {
            self.invoke_bucket(&hcl.to_string(), signal);
        }
        self.invoke_bucket(ALL_CELLS, signal);
        self.journal.record(signal);
    }

    fn invoke_bucket(&self, key: &str, signal: &AppSignal) {
        // Clone out of the map so a listener can (un)register without
        // deadlocking against the shard lock.
        let listeners: Vec<SignalHandler> = match self.handlers.get(key) {
            Some(bucket) => bucket.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };
        for listener in listeners {
            listener(signal);
        }
    }

    /// Register a signal listener, scoped to a locator or to all cells.
    pub fn add_signal_handler(
        &self,
        handler: SignalHandler,
        hcl: Option<&Hcl>,
    ) -> SignalUnsubscriber {
        let key = hcl
            .map(|h| h.to_string())
            .unwrap_or_else(|| ALL_CELLS.to_string());
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.entry(key.clone()).or_default().push((id, handler));
        SignalUnsubscriber {
            handlers: self.handlers.clone(),
            key,
            id,
        }
    }

    /// Dump journaled signals, optionally restricted to one cell.
    pub fn dump_signal_logs(&self, address: Option<&CellAddress>) -> SignalDump {
        self.journal.dump(address, None)
    }

    /// Clone descriptors for a role, ordered by clone index.
    pub fn get_clones(&self, app_id: &str, base_role_name: &str) -> Vec<ClonedCell> {
        let Some(app) = self.cells_by_app.get(app_id) else {
            return Vec::new();
        };
        let Some(cells) = app.get(base_role_name) else {
            return Vec::new();
        };
        let mut clones: Vec<ClonedCell> = cells.clones.values().cloned().collect();
        clones.sort_by_key(|c| {
            destructure_clone_id(&c.clone_id)
                .map(|(_, index)| index)
                .unwrap_or(u32::MAX)
        });
        clones
    }

    /// Base role names cached for an app.
    pub fn app_roles(&self, app_id: &str) -> Vec<String> {
        self.cells_by_app
            .get(app_id)
            .map(|roles| roles.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Display name recorded for a locator, if any.
    pub fn cell_name(&self, hcl: &Hcl) -> Option<String> {
        self.journal.name(hcl)
    }

    /// Zome call through the transport with the registry's default timeout.
    pub async fn call_zome(&self, request: CallZomeRequest) -> Result<serde_json::Value> {
        self.transport
            .call_zome(request, self.config.default_timeout)
            .await
    }

    pub async fn create_clone_cell(&self, request: CreateCloneCellRequest) -> Result<ClonedCell> {
        self.transport.create_clone_cell(request).await
    }

    pub async fn enable_clone_cell(&self, app_id: &str, clone_id: &str) -> Result<ClonedCell> {
        self.transport.enable_clone_cell(app_id, clone_id).await
    }

    pub async fn disable_clone_cell(&self, app_id: &str, clone_id: &str) -> Result<()> {
        self.transport.disable_clone_cell(app_id, clone_id).await
    }
}
