//! quicd-dispatcher: routes datagrams arriving on one UDP socket to the
//! connections they belong to.
//!
//! # Module Organization
//!
//! - `dispatcher`: the router itself, plus its session table, write-blocked
//!   queue, deferred deletion and time-wait list
//! - `apps`: application registry and the built-in echo session
//! - `worker`: the reactor thread that feeds the dispatcher from the socket
//! - `netio`: socket creation and tuning
//! - `config`: layered configuration (file, environment, CLI)
//! - `telemetry`: logging and OTLP metrics
//! - `runtime`: the tokio runtime for everything off the packet path

pub mod apps;
pub mod config;
pub mod dispatcher;
pub mod netio;
pub mod runtime;
pub mod telemetry;
pub mod worker;
