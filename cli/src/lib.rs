//! Merrymaker control-plane composition root and CLI binary.
//!
//! Wires the component crates (store, scheduler, runner, reaper, rules, pipeline, alerts)
//! into the processes an operator actually runs: `migrate`, `scheduler`, `worker`, `reaper`,
//! and the one-shot `scan-runner` used for manual/smoke-test scans.

pub mod app;
pub mod config;
pub mod handlers;
pub mod migrate;
pub mod reaper_cmd;
pub mod scan_runner_cmd;
pub mod scheduler_cmd;
pub mod worker_cmd;
