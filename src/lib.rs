//! conductor-proxy - Client-side proxy layer for a Holochain conductor
//!
//! Sits between application view-models and a conductor connection:
//!
//! - **HCL locators** (`cell:/<app>/<role>[/<clone>]`) give every cell a
//!   human-readable address decoupled from its DNA hash and agent key
//! - **CellProxy** is the per-cell call path: append-only call logs plus an
//!   admission mutex that serializes state-mutating ("blocking") calls
//! - **AppProxy** is the per-connection registry: cell cache, one proxy per
//!   cell, signal fan-out to locator-scoped and catch-all listeners
//! - **Happ** manages instance lifecycle: originals per role and runtime
//!   clone creation with sequential indices
//!
//! The conductor itself is reached through the [`transport::ConductorTransport`]
//! trait; [`transport::ConductorSession`] is the real websocket implementation.

pub mod cell;
pub mod config;
pub mod error;
pub mod happ;
pub mod hcl;
pub mod pretty;
pub mod proxy;
pub mod signal;
pub mod transport;

pub use cell::{AnyCell, Cell, CellAddress, CellInfo, CellsForRole, ClonedCell, DnaModifiers, ProvisionedCell};
pub use config::{RuntimeConfig, SessionConfig};
pub use error::{ProxyError, Result};
pub use happ::{CellInstance, CloneOverrides, Happ, InstanceFactory, RoleDef};
pub use hcl::Hcl;
pub use proxy::{AppProxy, CellProxy, SignalHandler, SignalUnsubscriber};
pub use signal::{AppSignal, SignalJournal, SignalType, SystemSignalProtocol};
pub use transport::{ConductorSession, ConductorTransport};
