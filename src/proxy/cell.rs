//! Per-cell call proxy
//!
//! One [`CellProxy`] exists per live cell on a connection. It owns the
//! append-only request/response logs for that cell and the admission mutex
//! that serializes blocking calls. Non-blocking calls bypass admission
//! entirely and may overlap with anything.
//!
//! A failed call dumps the cell's call history and its signal history before
//! propagating the error, so the console shows what led up to the failure.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::cell::{Cell, CellAddress};
use crate::config::RuntimeConfig;
use crate::error::{ProxyError, Result};
use crate::hcl::Hcl;
use crate::pretty::{pretty_date, pretty_duration, truncate_payload};
use crate::signal::SignalJournal;
use crate::transport::{CallZomeRequest, ConductorTransport};

/// Characters of payload kept in log rows.
const PAYLOAD_PREVIEW: usize = 64;

/// One dispatched call, recorded at dispatch time.
#[derive(Debug, Clone)]
pub struct RequestLog {
    /// When the caller asked for the call (before any admission wait)
    pub enqueued: DateTime<Utc>,
    /// When the call actually went to the transport
    pub dispatched: DateTime<Utc>,
    pub zome_name: String,
    pub fn_name: String,
    pub input: String,
    pub timeout: Duration,
}

/// Outcome of a dispatched call, referencing its request by index.
#[derive(Debug, Clone)]
pub struct ResponseLog {
    pub ts: DateTime<Utc>,
    pub request_index: usize,
    /// Error rendering when the call failed
    pub failure: Option<String>,
    pub output: String,
}

/// One joined row of the call log dump.
#[derive(Debug, Clone)]
pub struct CallLogRow {
    pub started: String,
    /// Admission wait before dispatch
    pub waited: String,
    pub took: String,
    pub call: String,
    pub input: String,
    pub output: String,
}

/// Call path to one cell.
pub struct CellProxy {
    transport: Arc<dyn ConductorTransport>,
    cell: Cell,
    journal: Arc<SignalJournal>,
    default_timeout: Duration,
    entry_defs_timeout: Duration,
    /// Serializes blocking calls. Non-blocking calls never touch it.
    admission: tokio::sync::Mutex<()>,
    requests: RwLock<Vec<RequestLog>>,
    responses: RwLock<Vec<ResponseLog>>,
}

impl CellProxy {
    pub fn new(
        transport: Arc<dyn ConductorTransport>,
        cell: Cell,
        journal: Arc<SignalJournal>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            transport,
            cell,
            journal,
            default_timeout: config.default_timeout,
            entry_defs_timeout: config.entry_defs_timeout,
            admission: tokio::sync::Mutex::new(()),
            requests: RwLock::new(Vec::new()),
            responses: RwLock::new(Vec::new()),
        }
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn hcl(&self) -> &Hcl {
        &self.cell.hcl
    }

    pub fn address(&self) -> &CellAddress {
        self.cell.address()
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    /// Call a zome function. Never waits on the admission mutex, so it may
    /// run concurrently with blocking calls and other non-blocking calls.
    pub async fn call(
        &self,
        zome_name: &str,
        fn_name: &str,
        payload: serde_json::Value,
        cap_secret: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let enqueued = Utc::now();
        self.execute(enqueued, zome_name, fn_name, payload, cap_secret, timeout)
            .await
    }

    /// Call a zome function that mutates source-chain state. At most one
    /// blocking call per cell is in flight; admission elapsing the timeout
    /// fails without dispatching anything.
    pub async fn call_blocking(
        &self,
        zome_name: &str,
        fn_name: &str,
        payload: serde_json::Value,
        cap_secret: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let enqueued = Utc::now();
        let timeout = timeout.unwrap_or(self.default_timeout);

        let guard = match tokio::time::timeout(timeout, self.admission.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                error!(
                    cell = %self.name(),
                    zome = zome_name,
                    fn_name = fn_name,
                    waited = ?timeout,
                    "Blocking call admission timed out"
                );
                self.dump_diagnostics();
                return Err(ProxyError::AdmissionTimeout {
                    cell: self.name().to_string(),
                    waited: timeout,
                });
            }
        };

        let result = self
            .execute(enqueued, zome_name, fn_name, payload, cap_secret, Some(timeout))
            .await;
        drop(guard);
        result
    }

    /// Introspect the entry definitions of a zome. Returns `(id, is_public)`
    /// pairs with a short fixed timeout.
    pub async fn entry_defs(&self, zome_name: &str) -> Result<Vec<(String, bool)>> {
        let result = self
            .call(
                zome_name,
                "entry_defs",
                serde_json::Value::Null,
                None,
                Some(self.entry_defs_timeout),
            )
            .await
            .map_err(|e| {
                error!(zome = zome_name, error = %e, "entry_defs call failed");
                ProxyError::IntrospectionFailed(zome_name.to_string())
            })?;

        let defs = result
            .get("Defs")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProxyError::IntrospectionFailed(zome_name.to_string()))?;

        let mut out = Vec::with_capacity(defs.len());
        for def in defs {
            let id = def
                .get("id")
                .and_then(|id| id.get("App"))
                .and_then(|v| v.as_str())
                .ok_or_else(|| ProxyError::IntrospectionFailed(zome_name.to_string()))?;
            let public = def.get("visibility").and_then(|v| v.as_str()) == Some("Public");
            out.push((id.to_string(), public));
        }
        Ok(out)
    }

    async fn execute(
        &self,
        enqueued: DateTime<Utc>,
        zome_name: &str,
        fn_name: &str,
        payload: serde_json::Value,
        cap_secret: Option<Vec<u8>>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let dispatched = Utc::now();

        let request_index = {
            let mut requests = self.requests.write();
            requests.push(RequestLog {
                enqueued,
                dispatched,
                zome_name: zome_name.to_string(),
                fn_name: fn_name.to_string(),
                input: truncate_payload(&payload, PAYLOAD_PREVIEW),
                timeout,
            });
            requests.len() - 1
        };

        debug!(
            cell = %self.name(),
            zome = zome_name,
            fn_name = fn_name,
            "Dispatching call"
        );

        let request = CallZomeRequest {
            cell_id: self.address().clone(),
            zome_name: zome_name.to_string(),
            fn_name: fn_name.to_string(),
            payload,
            cap_secret,
            provenance: self.address().agent_key.clone(),
        };

        let result = self.transport.call_zome(request, timeout).await;
        let ts = Utc::now();

        match result {
            Ok(output) => {
                self.responses.write().push(ResponseLog {
                    ts,
                    request_index,
                    failure: None,
                    output: truncate_payload(&output, PAYLOAD_PREVIEW),
                });
                Ok(output)
            }
            Err(e) => {
                self.responses.write().push(ResponseLog {
                    ts,
                    request_index,
                    failure: Some(e.to_string()),
                    output: String::new(),
                });
                error!(
                    cell = %self.name(),
                    zome = zome_name,
                    fn_name = fn_name,
                    error = %e,
                    "Zome call failed"
                );
                self.dump_diagnostics();
                Err(e)
            }
        }
    }

    fn dump_diagnostics(&self) {
        self.dump_call_logs(None);
        self.journal.dump(Some(self.address()), None);
    }

    /// Join the request and response logs into dump rows, newest last.
    /// Requests without a response yet render as in-flight.
    pub fn dump_call_logs(&self, zome_filter: Option<&str>) -> Vec<CallLogRow> {
        let requests = self.requests.read();
        let responses = self.responses.read();

        let mut rows = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            if let Some(filter) = zome_filter {
                if request.zome_name != filter {
                    continue;
                }
            }
            let response = responses.iter().find(|r| r.request_index == index);
            let wait = (request.dispatched - request.enqueued)
                .to_std()
                .unwrap_or_default();
            let (took, output) = match response {
                Some(response) => {
                    let took = (response.ts - request.dispatched).to_std().unwrap_or_default();
                    let output = match &response.failure {
                        Some(failure) => format!("FAILED: {}", failure),
                        None => response.output.clone(),
                    };
                    (pretty_duration(took), output)
                }
                None => ("-".to_string(), "(in flight)".to_string()),
            };
            rows.push(CallLogRow {
                started: pretty_date(request.enqueued),
                waited: pretty_duration(wait),
                took,
                call: format!("{}.{}", request.zome_name, request.fn_name),
                input: request.input.clone(),
                output,
            });
        }

        warn!(
            cell = %self.name(),
            calls = rows.len(),
            "Call log dump for {}",
            self.hcl()
        );
        for row in &rows {
            warn!(
                "  {} wait {} took {} {} in={} out={}",
                row.started, row.waited, row.took, row.call, row.input, row.output
            );
        }
        rows
    }
}
