//! Call proxies and the connection-level registry

pub mod app;
pub mod cell;

pub use app::{AppProxy, SignalHandler, SignalUnsubscriber};
pub use cell::{CallLogRow, CellProxy, RequestLog, ResponseLog};
