//! The boundary between the core and an embedded script engine. The core
//! never knows what language (if any) sits behind these hooks; it hands over
//! decoded records at well-defined points and interprets the returned action.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Endpoint;
use crate::core::Proxy;
use crate::protocol::machine::State;
use crate::protocol::packet::Packet;

/// What to do with a packet after its hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    /// Forward to the paired connection if one exists, else drop.
    #[default]
    Proceed,
    /// Never forward, even when paired.
    NoProxy,
    /// Forward, then sever the pairing.
    FlushDisconnect,
}

/// Callbacks the core fires as connections progress. Implementations keep
/// their own state behind interior mutability; methods take `&self` so a hook
/// that closes a connection may safely re-enter `on_close`.
///
/// Hooks run synchronously on the reactor thread and must not block. A hook
/// returning an error is logged and treated as the default action; it never
/// tears protocol state down.
pub trait ScriptHooks {
    /// A listener accepted a client-facing connection.
    fn on_new_client(&self, proxy: &Proxy, client: u64, listener: u64) -> Result<()> {
        let _ = (proxy, client, listener);
        Ok(())
    }

    /// A packet was received and decoded on `conn`; `state` is the protocol
    /// state after the transition. The record is absent for payloads with no
    /// typed form and may be mutated in place before the hook writes it
    /// somewhere with [`Proxy::write_packet`].
    fn on_packet(
        &self,
        proxy: &Proxy,
        conn: u64,
        state: State,
        packet: Option<&mut Packet>,
    ) -> Result<HookAction> {
        let _ = (proxy, conn, state, packet);
        Ok(HookAction::Proceed)
    }

    /// `conn` is going away. Fired exactly once, before the pairing is
    /// severed, so the hook can still find the peer.
    fn on_close(&self, proxy: &Proxy, conn: u64) {
        let _ = (proxy, conn);
    }
}

/// The built-in hook set: pair every accepted client with a fresh upstream
/// connection and let the whole exchange flow through untouched.
pub struct Passthrough {
    upstream: Endpoint,
}

impl Passthrough {
    pub fn new(upstream: Endpoint) -> Self {
        Passthrough { upstream }
    }
}

impl ScriptHooks for Passthrough {
    fn on_new_client(&self, proxy: &Proxy, client: u64, listener: u64) -> Result<()> {
        debug!(client, listener, "pairing new client with upstream");
        let server = match &self.upstream {
            Endpoint::Tcp { addr } => proxy.connect_tcp(*addr)?,
            Endpoint::Unix { path, .. } => proxy.connect_unix(path)?,
        };
        proxy.pair(client, server)?;
        Ok(())
    }

    fn on_close(&self, proxy: &Proxy, conn: u64) {
        // Tear down the other half of the pair; a lone backend connection is
        // useless to us and a lone client would hang forever.
        if let Some(peer) = proxy.remote_of(conn) {
            debug!(conn, peer, "closing peer of finished connection");
            proxy.close(peer);
        }
    }
}

/// Runs a fallible hook result, mapping errors to the default action the way
/// the core treats every scripting failure.
pub(crate) fn action_or_default(conn: u64, result: Result<HookAction>) -> HookAction {
    match result {
        Ok(action) => action,
        Err(error) => {
            warn!(conn, "packet hook failed: {error:#}");
            HookAction::default()
        }
    }
}

// Wall-clock helpers for script engines that want timestamps without their
// own bindings.

pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_action_is_proceed() {
        assert_eq!(HookAction::default(), HookAction::Proceed);
    }

    #[test]
    fn hook_errors_fall_back_to_default() {
        assert_eq!(
            action_or_default(1, Err(anyhow::anyhow!("boom"))),
            HookAction::Proceed
        );
        assert_eq!(
            action_or_default(1, Ok(HookAction::NoProxy)),
            HookAction::NoProxy
        );
    }

    #[test]
    fn clocks_agree_on_scale() {
        let secs = now_secs();
        let millis = now_millis();
        let micros = now_micros();
        assert!((millis / 1000 - secs).abs() <= 1);
        assert!((micros / 1000 - millis).abs() <= 1000);
    }
}
