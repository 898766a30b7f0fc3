//! Core library for sleepingd, an on-demand TCP reverse proxy.
//!
//! A `Coordinator` owns a `SubprocessManager` and a `DeadMansSwitch` behind a
//! single lifecycle mutex. A `Proxy` drives the accept loop and, per client,
//! a `LazyConn` that defers dialing the upstream until the client writes its
//! first byte. Bytes flow through an `ActivityCopier`, which pings the switch
//! on the way through.
//!
//! Quick start:
//! - Load a `config::Config` via `config::env::load()`.
//! - Build a `Coordinator` with `coordinator::Coordinator::new(...)`.
//! - Run `proxy::Proxy::bind(...)` with the coordinator's callbacks wired in.

pub mod activity;
pub mod config;
pub mod coordinator;
pub mod dead_mans_switch;
pub mod diag;
pub mod lazy_conn;
pub mod logging;
pub mod observability;
pub mod shell;
pub mod subprocess;

pub mod proxy;
