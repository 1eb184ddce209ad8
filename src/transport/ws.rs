//! Websocket session with the conductor's app interface
//!
//! A [`ConductorSession`] can only be created via [`ConductorSession::connect`],
//! which connects, authenticates when a token is configured, and spawns the
//! receiver task before returning. If you hold a session, it is ready to use.
//!
//! Responses are routed back to callers by request id through a pending map
//! of oneshot channels. Signal frames carry no id and are forwarded to the
//! registered [`SignalSink`] instead.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::RwLock;
use rmpv::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::protocol::{
    self, decode_frame, encode_authenticate, encode_request, encode_zome_call, WireFrame,
};
use super::{
    AppInfo, CallZomeRequest, ConductorTransport, CreateCloneCellRequest, SignalSink,
};
use crate::cell::{CellAddress, CellInfo, ClonedCell, DnaModifiers, ProvisionedCell};
use crate::config::SessionConfig;
use crate::error::{ProxyError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;
type SinkSlot = Arc<RwLock<Option<SignalSink>>>;

/// An established connection to the conductor's app interface.
pub struct ConductorSession {
    config: SessionConfig,
    sink: Mutex<WsSink>,
    next_id: AtomicU64,
    pending: PendingMap,
    signal_sink: SinkSlot,
    recv_task: tokio::task::JoinHandle<()>,
}

impl ConductorSession {
    /// Connect and authenticate. Returns only once the session is usable.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        info!(app_url = %config.app_url, "Connecting to conductor");

        let request = Request::builder()
            .uri(&config.app_url)
            .header("Host", extract_host(&config.app_url))
            .header("Origin", "http://localhost")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| ProxyError::Transport(format!("Failed to build request: {}", e)))?;

        let (ws, _) = connect_async_with_config(request, None, false)
            .await
            .map_err(|e| ProxyError::Transport(format!("WebSocket connect failed: {}", e)))?;
        let (mut sink, stream) = ws.split();
        debug!("WebSocket connected");

        if let Some(ref token) = config.auth_token {
            let frame = encode_authenticate(token)?;
            sink.send(Message::Binary(frame))
                .await
                .map_err(|e| ProxyError::Transport(format!("Failed to authenticate: {}", e)))?;
            debug!("Authentication frame sent");
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let signal_sink: SinkSlot = Arc::new(RwLock::new(None));

        let pending_for_recv = Arc::clone(&pending);
        let sink_for_recv = Arc::clone(&signal_sink);
        let recv_task = tokio::spawn(async move {
            receiver_loop(stream, pending_for_recv, sink_for_recv).await;
        });

        info!("Conductor session established");

        Ok(Self {
            config,
            sink: Mutex::new(sink),
            next_id: AtomicU64::new(1),
            pending,
            signal_sink,
            recv_task,
        })
    }

    /// Whether the receiver task is still running. Does not guarantee the
    /// next request will succeed.
    pub fn is_alive(&self) -> bool {
        !self.recv_task.is_finished()
    }

    pub fn app_url(&self) -> &str {
        &self.config.app_url
    }

    /// Send an encoded request and wait for the matching response frame.
    async fn dispatch(&self, id: u64, bytes: Vec<u8>, timeout: Duration) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, response_tx);
        }

        let send_result = self.sink.lock().await.send(Message::Binary(bytes)).await;
        if let Err(e) = send_result {
            self.pending.lock().await.remove(&id);
            return Err(ProxyError::Transport(format!("Failed to send: {}", e)));
        }

        match tokio::time::timeout(timeout, response_rx).await {
            Ok(Ok(result)) => result.map_err(ProxyError::Transport),
            Ok(Err(_)) => Err(ProxyError::Transport("Response channel closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ProxyError::Transport("Request timeout".into()))
            }
        }
    }

    /// Fire a named request with the session-wide timeout.
    async fn request(&self, request_type: &str, value: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let encoded = encode_request(id, request_type, value)?;
        self.dispatch(id, encoded.bytes, self.config.request_timeout)
            .await
    }
}

impl Drop for ConductorSession {
    fn drop(&mut self) {
        self.recv_task.abort();
        debug!("Session dropped, receiver task aborted");
    }
}

#[async_trait::async_trait]
impl ConductorTransport for ConductorSession {
    async fn call_zome(
        &self,
        request: CallZomeRequest,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            id = id,
            zome = %request.zome_name,
            fn_name = %request.fn_name,
            "Dispatching zome call"
        );
        let encoded = encode_zome_call(
            id,
            &request.cell_id,
            &request.zome_name,
            &request.fn_name,
            &request.payload,
            request.cap_secret.as_deref(),
            &request.provenance,
        )?;
        let value = self.dispatch(id, encoded.bytes, timeout).await?;
        Ok(protocol::rmpv_to_json(&value))
    }

    async fn app_info(&self, app_id: &str) -> Result<AppInfo> {
        let value = Value::Map(vec![(
            Value::String("installed_app_id".into()),
            Value::String(app_id.into()),
        )]);
        let response = self.request("app_info", value).await?;
        parse_app_info(app_id, &response)
    }

    async fn create_clone_cell(&self, request: CreateCloneCellRequest) -> Result<ClonedCell> {
        let mut fields = vec![
            (
                Value::String("role_name".into()),
                Value::String(request.role_name.into()),
            ),
            (
                Value::String("modifiers".into()),
                encode_modifiers(&request.modifiers),
            ),
        ];
        if let Some(proof) = request.membrane_proof {
            fields.push((
                Value::String("membrane_proof".into()),
                Value::Binary(proof),
            ));
        }
        if let Some(name) = request.name {
            fields.push((Value::String("name".into()), Value::String(name.into())));
        }
        let response = self
            .request("create_clone_cell", Value::Map(fields))
            .await?;
        parse_cloned_cell(&response)
    }

    async fn enable_clone_cell(&self, _app_id: &str, clone_id: &str) -> Result<ClonedCell> {
        let value = Value::Map(vec![(
            Value::String("clone_cell_id".into()),
            Value::String(clone_id.into()),
        )]);
        let response = self.request("enable_clone_cell", value).await?;
        parse_cloned_cell(&response)
    }

    async fn disable_clone_cell(&self, _app_id: &str, clone_id: &str) -> Result<()> {
        let value = Value::Map(vec![(
            Value::String("clone_cell_id".into()),
            Value::String(clone_id.into()),
        )]);
        self.request("disable_clone_cell", value).await?;
        Ok(())
    }

    fn set_signal_sink(&self, sink: SignalSink) {
        *self.signal_sink.write() = Some(sink);
    }
}

/// Receiver loop. Routes responses by id, forwards signals to the sink.
async fn receiver_loop(mut stream: WsStream, pending: PendingMap, signal_sink: SinkSlot) {
    debug!("Receiver loop started");

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => match decode_frame(&data) {
                Ok(WireFrame::Response { id, result }) => {
                    let mut pending = pending.lock().await;
                    if let Some(tx) = pending.remove(&id) {
                        let _ = tx.send(result);
                    } else {
                        warn!(id = id, "Response for unknown request id");
                    }
                }
                Ok(WireFrame::Signal(signal)) => {
                    let sink = signal_sink.read();
                    if let Some(ref sink) = *sink {
                        sink(signal);
                    } else {
                        debug!("Signal received before a sink was registered");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to decode frame");
                }
            },
            Ok(Message::Ping(_)) => {
                // Pong is handled automatically by tungstenite
            }
            Ok(Message::Close(frame)) => {
                info!(frame = ?frame, "Conductor closed connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    debug!("Receiver loop ended");

    let mut pending = pending.lock().await;
    for (id, tx) in pending.drain() {
        debug!(id = id, "Cleaning up pending request");
        let _ = tx.send(Err("Session closed".to_string()));
    }
}

fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}

fn encode_modifiers(modifiers: &DnaModifiers) -> Value {
    let mut fields = vec![(
        Value::String("network_seed".into()),
        Value::String(modifiers.network_seed.as_str().into()),
    )];
    if let Some(ref properties) = modifiers.properties {
        fields.push((
            Value::String("properties".into()),
            protocol::json_to_rmpv(properties),
        ));
    }
    Value::Map(fields)
}

fn map_field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .as_map()
        .and_then(|map| {
            map.iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        })
        .ok_or_else(|| ProxyError::Wire(format!("missing field '{}'", key)))
}

fn str_field(value: &Value, key: &str) -> Result<String> {
    map_field(value, key)?
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ProxyError::Wire(format!("field '{}' is not a string", key)))
}

fn parse_address(value: &Value) -> Result<CellAddress> {
    let pair = value
        .as_array()
        .ok_or_else(|| ProxyError::Wire("cell_id is not an array".into()))?;
    if pair.len() != 2 {
        return Err(ProxyError::Wire("cell_id is not a pair".into()));
    }
    let dna = pair[0]
        .as_slice()
        .ok_or_else(|| ProxyError::Wire("cell_id dna is not binary".into()))?;
    let agent = pair[1]
        .as_slice()
        .ok_or_else(|| ProxyError::Wire("cell_id agent is not binary".into()))?;
    Ok(CellAddress::new(dna.to_vec(), agent.to_vec()))
}

fn parse_modifiers(value: &Value) -> Result<DnaModifiers> {
    let network_seed = str_field(value, "network_seed").unwrap_or_default();
    let properties = map_field(value, "properties")
        .ok()
        .filter(|v| !v.is_nil())
        .map(protocol::rmpv_to_json);
    Ok(DnaModifiers {
        network_seed,
        properties,
    })
}

fn parse_cloned_cell(value: &Value) -> Result<ClonedCell> {
    Ok(ClonedCell {
        cell_id: parse_address(map_field(value, "cell_id")?)?,
        clone_id: str_field(value, "clone_id")?,
        name: str_field(value, "name").unwrap_or_default(),
        enabled: map_field(value, "enabled")
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        dna_modifiers: map_field(value, "dna_modifiers")
            .and_then(parse_modifiers)
            .unwrap_or_default(),
    })
}

fn parse_app_info(app_id: &str, value: &Value) -> Result<AppInfo> {
    let cell_info_map = map_field(value, "cell_info")?
        .as_map()
        .ok_or_else(|| ProxyError::Wire("cell_info is not a map".into()))?;

    let mut cell_info = HashMap::new();
    for (role, entries) in cell_info_map {
        let role = role
            .as_str()
            .ok_or_else(|| ProxyError::Wire("role name is not a string".into()))?;
        let entries = entries
            .as_array()
            .ok_or_else(|| ProxyError::Wire("cell list is not an array".into()))?;
        let mut cells = Vec::with_capacity(entries.len());
        for entry in entries {
            cells.push(parse_cell_info(entry)?);
        }
        cell_info.insert(role.to_string(), cells);
    }

    Ok(AppInfo {
        app_id: app_id.to_string(),
        cell_info,
    })
}

fn parse_cell_info(value: &Value) -> Result<CellInfo> {
    let kind = str_field(value, "type")?;
    match kind.as_str() {
        "provisioned" => {
            let inner = map_field(value, "value")?;
            Ok(CellInfo::Provisioned(ProvisionedCell {
                cell_id: parse_address(map_field(inner, "cell_id")?)?,
                name: str_field(inner, "name").unwrap_or_default(),
            }))
        }
        "cloned" => {
            let inner = map_field(value, "value")?;
            Ok(CellInfo::Cloned(parse_cloned_cell(inner)?))
        }
        "stem" => {
            let name = map_field(value, "value")
                .ok()
                .and_then(|inner| str_field(inner, "name").ok());
            Ok(CellInfo::Stem { name })
        }
        other => Err(ProxyError::Wire(format!("unknown cell kind: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("ws://localhost:4445"), "localhost:4445");
        assert_eq!(extract_host("wss://example.com/path"), "example.com");
        assert_eq!(extract_host("invalid"), "localhost");
    }

    #[test]
    fn test_parse_app_info_roles() {
        let info = Value::Map(vec![
            (
                Value::String("installed_app_id".into()),
                Value::String("where".into()),
            ),
            (
                Value::String("cell_info".into()),
                Value::Map(vec![(
                    Value::String("rWhere".into()),
                    Value::Array(vec![Value::Map(vec![
                        (Value::String("type".into()), Value::String("provisioned".into())),
                        (
                            Value::String("value".into()),
                            Value::Map(vec![
                                (
                                    Value::String("cell_id".into()),
                                    Value::Array(vec![
                                        Value::Binary(vec![9u8; 39]),
                                        Value::Binary(vec![8u8; 39]),
                                    ]),
                                ),
                                (Value::String("name".into()), Value::String("rWhere".into())),
                            ]),
                        ),
                    ])]),
                )]),
            ),
        ]);

        let parsed = parse_app_info("where", &info).unwrap();
        assert_eq!(parsed.app_id, "where");
        let cells = &parsed.cell_info["rWhere"];
        assert_eq!(cells.len(), 1);
        match &cells[0] {
            CellInfo::Provisioned(cell) => assert_eq!(cell.name, "rWhere"),
            other => panic!("unexpected cell kind: {:?}", other),
        }
    }

    #[test]
    fn test_parse_cloned_cell_defaults() {
        let cloned = Value::Map(vec![
            (
                Value::String("cell_id".into()),
                Value::Array(vec![
                    Value::Binary(vec![1u8; 39]),
                    Value::Binary(vec![2u8; 39]),
                ]),
            ),
            (Value::String("clone_id".into()), Value::String("rWhere.0".into())),
        ]);
        let parsed = parse_cloned_cell(&cloned).unwrap();
        assert_eq!(parsed.clone_id, "rWhere.0");
        assert!(parsed.enabled);
        assert_eq!(parsed.dna_modifiers.network_seed, "");
    }
}
