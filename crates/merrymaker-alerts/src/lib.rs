//! The Alert Dispatcher (§4.7): pluggable sinks behind the `AlertSink` trait
//! (`merrymaker-core`), fanned out one job per `(alert, sink)` so a failing sink's retries
//! never block or duplicate delivery through another.

mod dispatch;
mod http;
mod kafka;
mod registry;

pub use dispatch::{handle_alert_dispatch, handle_alert_fanout, AlertDispatchPayload, AlertJobPayload};
pub use http::{GoAlertSink, GoAlertSinkConfig};
pub use kafka::{KafkaAlertSink, KafkaAlertSinkConfig};
pub use registry::SinkRegistry;
