//! A scriptable, event-driven proxy for the MySQL 4.1+ wire protocol.
//!
//! The core accepts client connections, optionally opens backend
//! connections, decodes every packet on both sides into typed records,
//! drives a per-connection state machine and hands each transition to an
//! embedder-provided [`ScriptHooks`] implementation. Hooks may inspect or
//! mutate records, write packets of their own, pair a client with a backend
//! (after which raw packets forward between them with resequenced headers)
//! or tear connections down.

pub mod auth;
pub mod config;
pub mod conn;
pub mod core;
pub mod error;
pub mod protocol;
pub mod script;

pub use crate::config::{Endpoint, ProxyConfig};
pub use crate::core::Proxy;
pub use crate::error::ProtocolError;
pub use crate::script::{HookAction, Passthrough, ScriptHooks};
