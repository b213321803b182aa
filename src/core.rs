//! The connection/eventing core: accept loops, per-connection I/O driven by
//! socket readiness, the receive pass that feeds the state machine and the
//! hook layer, and packet forwarding between paired connections.
//!
//! Everything here runs on one thread. Connections are shared as
//! `Rc<RefCell<Conn>>` between the reactor tasks; hooks are called
//! synchronously from the receive pass and may re-enter the proxy's
//! operations.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpSocket, TcpStream, UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::conn::{Conn, ConnRef, IoState, ReadOutcome, Role, Stream};
use crate::protocol::frame::{self, Frame};
use crate::protocol::machine::State;
use crate::protocol::packet::{Packet, PacketKind};
use crate::script::{self, HookAction, ScriptHooks};

struct Inner {
    conns: RefCell<HashMap<u64, ConnRef>>,
    next_id: Cell<u64>,
    /// Connections whose write buffers were appended to during the current
    /// receive pass, drained once at the end of it.
    flush_list: RefCell<Vec<ConnRef>>,
    hooks: Box<dyn ScriptHooks>,
}

/// Handle to the proxy core. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Proxy {
    inner: Rc<Inner>,
}

enum ListenerSocket {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl ListenerSocket {
    async fn accept(&self) -> io::Result<Stream> {
        match self {
            ListenerSocket::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                stream.set_linger(Some(Duration::ZERO))?;
                debug!(%peer, "accepted client connection");
                Ok(Stream::Tcp(stream))
            }
            ListenerSocket::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Stream::Unix(stream))
            }
        }
    }
}

impl Proxy {
    pub fn new(hooks: impl ScriptHooks + 'static) -> Self {
        Proxy {
            inner: Rc::new(Inner {
                conns: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                flush_list: RefCell::new(Vec::new()),
                hooks: Box::new(hooks),
            }),
        }
    }

    fn alloc_id(&self) -> u64 {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        id
    }

    fn register(&self, conn: Conn) -> ConnRef {
        let id = conn.id;
        let conn = Rc::new(RefCell::new(conn));
        self.inner.conns.borrow_mut().insert(id, conn.clone());
        conn
    }

    pub fn conn(&self, id: u64) -> Option<ConnRef> {
        self.inner.conns.borrow().get(&id).cloned()
    }

    pub fn is_alive(&self, id: u64) -> bool {
        self.conn(id).is_some_and(|c| c.borrow().alive)
    }

    /// The live paired peer of `id`, if the pairing is intact.
    pub fn remote_of(&self, id: u64) -> Option<u64> {
        let conn = self.conn(id)?;
        let conn = conn.borrow();
        let remote = conn.remote.upgrade()?;
        let remote = remote.borrow();
        (remote.id == conn.remote_id && remote.alive).then_some(remote.id)
    }

    // ------------------------------------------------------------------
    // Listeners and outbound connections
    // ------------------------------------------------------------------

    /// Binds a TCP listener and starts accepting. Returns the listener's
    /// connection id and the bound address.
    pub fn listen_tcp(&self, addr: SocketAddr) -> Result<(u64, SocketAddr)> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;
        let local = listener.local_addr()?;
        let id = self.spawn_listener(ListenerSocket::Tcp(listener));
        debug!(listener = id, %local, "listening");
        Ok((id, local))
    }

    /// Binds a Unix-domain listener with the given file mode, unlinking a
    /// stale socket at the path first.
    pub fn listen_unix(&self, path: &Path, mode: u32) -> Result<u64> {
        if let Ok(meta) = fs::symlink_metadata(path) {
            if meta.file_type().is_socket() {
                fs::remove_file(path)
                    .with_context(|| format!("unlinking stale socket {}", path.display()))?;
            }
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("binding unix socket {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        let id = self.spawn_listener(ListenerSocket::Unix(listener));
        debug!(listener = id, path = %path.display(), "listening");
        Ok(id)
    }

    fn spawn_listener(&self, socket: ListenerSocket) -> u64 {
        let conn = Conn::new(self.alloc_id(), Role::Listener, IoState::Reading, None);
        let id = conn.id;
        let conn = self.register(conn);
        let proxy = self.clone();
        tokio::task::spawn_local(async move {
            proxy.accept_loop(socket, conn).await;
        });
        id
    }

    async fn accept_loop(&self, socket: ListenerSocket, listener: ConnRef) {
        let (id, notify) = {
            let l = listener.borrow();
            (l.id, l.notify.clone())
        };
        loop {
            let accepted = tokio::select! {
                _ = notify.notified() => None,
                result = socket.accept() => Some(result),
            };
            if !listener.borrow().alive {
                break;
            }
            match accepted {
                None => continue,
                Some(Ok(stream)) => self.admit(stream, id),
                Some(Err(error)) => warn!(listener = id, %error, "accept failed"),
            }
        }
        debug!(listener = id, "listener closed");
    }

    /// Registers an accepted client-facing connection, gives the hook layer
    /// first crack at it, and starts its I/O task.
    fn admit(&self, stream: Stream, listener_id: u64) {
        let conn = Conn::new(
            self.alloc_id(),
            Role::Client,
            IoState::Reading,
            Some(Rc::new(stream)),
        );
        let id = conn.id;
        let conn = self.register(conn);
        debug!(conn = id, listener = listener_id, "new client connection");

        if let Err(error) = self.inner.hooks.on_new_client(self, id, listener_id) {
            warn!(conn = id, "new-client hook failed: {error:#}");
        }
        // The hook may have wired packets already.
        self.drain_flush_list();
        self.spawn_io(conn);
    }

    /// Starts a nonblocking connect toward a backend. The returned
    /// connection awaits the server greeting once the socket is up; packets
    /// written before that stay queued.
    pub fn connect_tcp(&self, addr: SocketAddr) -> Result<u64> {
        let conn = Conn::new(self.alloc_id(), Role::Server, IoState::Connecting, None);
        let id = conn.id;
        let conn = self.register(conn);
        let proxy = self.clone();
        tokio::task::spawn_local(async move {
            let connected = match TcpStream::connect(addr).await {
                Ok(stream) => stream
                    .set_nodelay(true)
                    .and_then(|()| stream.set_linger(Some(Duration::ZERO)))
                    .map(|()| stream),
                Err(error) => Err(error),
            };
            match connected {
                Ok(stream) => proxy.outbound_ready(conn, Stream::Tcp(stream)),
                Err(error) => {
                    warn!(conn = id, %addr, %error, "outbound connect failed");
                    proxy.close(id);
                }
            }
        });
        debug!(conn = id, %addr, "connecting to backend");
        Ok(id)
    }

    pub fn connect_unix(&self, path: &Path) -> Result<u64> {
        let conn = Conn::new(self.alloc_id(), Role::Server, IoState::Connecting, None);
        let id = conn.id;
        let conn = self.register(conn);
        let proxy = self.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_local(async move {
            match UnixStream::connect(&path).await {
                Ok(stream) => proxy.outbound_ready(conn, Stream::Unix(stream)),
                Err(error) => {
                    warn!(conn = id, path = %path.display(), %error, "outbound connect failed");
                    proxy.close(id);
                }
            }
        });
        debug!(conn = id, "connecting to backend socket");
        Ok(id)
    }

    fn outbound_ready(&self, conn: ConnRef, stream: Stream) {
        {
            let mut c = conn.borrow_mut();
            if !c.alive {
                return;
            }
            debug!(conn = c.id, "backend connected");
            c.stream = Some(Rc::new(stream));
            c.io_state = IoState::Reading;
        }
        // Flush anything hooks queued while the socket was connecting.
        self.add_to_flush_list(&conn);
        self.drain_flush_list();
        self.spawn_io(conn);
    }

    // ------------------------------------------------------------------
    // Per-connection I/O
    // ------------------------------------------------------------------

    fn spawn_io(&self, conn: ConnRef) {
        let proxy = self.clone();
        tokio::task::spawn_local(async move {
            proxy.run_io(conn).await;
        });
    }

    async fn run_io(&self, conn: ConnRef) {
        let conn_id = conn.borrow().id;
        loop {
            let (alive, stream, notify, want_write) = {
                let c = conn.borrow();
                (c.alive, c.stream.clone(), c.notify.clone(), c.has_pending_write())
            };
            if !alive {
                break;
            }
            let Some(stream) = stream else { break };
            let interest = if want_write {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };

            let readiness = tokio::select! {
                _ = notify.notified() => None,
                ready = stream.ready(interest) => Some(ready),
            };

            match readiness {
                // Woken up because a peer queued bytes for us, or because we
                // were closed from elsewhere.
                None => self.flush_conn(&conn),
                Some(Err(error)) => {
                    debug!(conn = conn_id, %error, "socket readiness failed");
                    self.close(conn_id);
                    break;
                }
                Some(Ok(ready)) => {
                    if ready.is_writable() {
                        self.flush_conn(&conn);
                    }
                    if ready.is_readable() {
                        let outcome = conn.borrow_mut().fill_read();
                        match outcome {
                            Ok(ReadOutcome::Closed) => {
                                debug!(conn = conn_id, "peer closed connection");
                                self.close(conn_id);
                                break;
                            }
                            Ok(ReadOutcome::Data(_)) => {
                                if let Err(error) = self.process_read(&conn) {
                                    warn!(conn = conn_id, %error, "protocol violation");
                                    self.close(conn_id);
                                    break;
                                }
                            }
                            Err(error) => {
                                debug!(conn = conn_id, %error, "read failed");
                                self.close(conn_id);
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!(conn = conn_id, "connection task finished");
    }

    // ------------------------------------------------------------------
    // Receive pass
    // ------------------------------------------------------------------

    /// Runs the framer over everything buffered on `conn`: one state-machine
    /// step, decode and hook call per packet, then a single drain of the
    /// flush list for whatever the pass produced.
    fn process_read(&self, conn: &ConnRef) -> Result<(), crate::error::ProtocolError> {
        loop {
            let (frame, kind, state, id) = {
                let mut c = conn.borrow_mut();
                if !c.alive {
                    return Ok(());
                }
                let Some(frame) = frame::next_frame(&mut c.rbuf)? else {
                    break;
                };
                if !c.machine.sequence_ok(frame.seq()) {
                    warn!(
                        conn = c.id,
                        expected = c.machine.seq,
                        got = frame.seq(),
                        "packet out of sequence"
                    );
                }
                let kind = c.machine.received(frame.first_byte(), frame.payload_len());
                (frame, kind, c.machine.state, c.id)
            };

            let mut record = Packet::decode(kind, frame.payload())?;
            if let Some(Packet::ResultSetHeader(header)) = &record {
                conn.borrow_mut().machine.field_count = header.field_count;
            }

            let action = script::action_or_default(
                id,
                self.inner.hooks.on_packet(self, id, state, record.as_mut()),
            );

            // The hook may have torn this connection down.
            if !conn.borrow().alive {
                break;
            }

            if matches!(action, HookAction::Proceed | HookAction::FlushDisconnect) {
                self.forward(conn, &frame, kind, record.as_ref());
            }
            if action == HookAction::FlushDisconnect {
                self.sever(conn);
            }
        }
        self.drain_flush_list();
        Ok(())
    }

    /// Copies a received frame into the paired peer's write buffer, stamping
    /// the header with the peer's own sequence number.
    fn forward(&self, source: &ConnRef, frame: &Frame, kind: PacketKind, record: Option<&Packet>) {
        let remote = {
            let c = source.borrow();
            let Some(remote) = c.remote.upgrade() else {
                return;
            };
            // An id mismatch means the link went stale under us.
            if remote.borrow().id != c.remote_id {
                return;
            }
            remote
        };
        {
            let mut r = remote.borrow_mut();
            if !r.alive {
                return;
            }
            let seq = r.machine.sent(kind, record.and_then(Packet::command));
            let wire = frame.as_wire();
            r.reserve_write(wire.len());
            let seq_at = r.wbuf.len() + 3;
            r.wbuf.extend_from_slice(wire);
            r.wbuf[seq_at] = seq;
        }
        self.add_to_flush_list(&remote);
    }

    /// Clears the pairing on both ends, verifying the recorded identities.
    fn sever(&self, conn: &ConnRef) {
        let remote = {
            let mut c = conn.borrow_mut();
            let remote = c.remote.upgrade();
            let remote_id = c.remote_id;
            c.remote = Weak::new();
            c.remote_id = 0;
            remote.filter(|r| r.borrow().id == remote_id)
        };
        if let Some(remote) = remote {
            let mut r = remote.borrow_mut();
            r.remote = Weak::new();
            r.remote_id = 0;
        }
    }

    // ------------------------------------------------------------------
    // Flush list
    // ------------------------------------------------------------------

    fn add_to_flush_list(&self, conn: &ConnRef) {
        {
            let mut c = conn.borrow_mut();
            if c.in_flush_list || !c.alive {
                return;
            }
            c.in_flush_list = true;
        }
        self.inner.flush_list.borrow_mut().push(conn.clone());
    }

    /// Walks the flush list once, detaching entries as it goes and giving
    /// each a best-effort nonblocking write.
    fn drain_flush_list(&self) {
        loop {
            let Some(conn) = self.inner.flush_list.borrow_mut().pop() else {
                break;
            };
            conn.borrow_mut().in_flush_list = false;
            self.flush_conn(&conn);
        }
    }

    fn flush_conn(&self, conn: &ConnRef) {
        let (id, result, notify) = {
            let mut c = conn.borrow_mut();
            if !c.alive {
                return;
            }
            let result = c.try_flush();
            (c.id, result, c.notify.clone())
        };
        match result {
            Ok(true) => {}
            // Socket is full; the connection's own task finishes the drain
            // once writability comes back.
            Ok(false) => notify.notify_one(),
            Err(error) => {
                debug!(conn = id, %error, "write failed");
                self.close(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations exposed to the hook layer
    // ------------------------------------------------------------------

    /// Encodes a packet record onto `id`'s write buffer, advancing its state
    /// machine as for any sent packet, and schedules a flush.
    pub fn write_packet(&self, id: u64, packet: &Packet) -> Result<()> {
        let conn = self.conn(id).context("no such connection")?;
        {
            let mut c = conn.borrow_mut();
            if !c.alive {
                bail!("connection {id} is closed");
            }
            let seq = c.machine.sent(packet.kind(), packet.command());
            let mut bytes = BytesMut::new();
            packet.encode(seq, &mut bytes);
            c.reserve_write(bytes.len());
            c.wbuf.extend_from_slice(&bytes);
        }
        self.add_to_flush_list(&conn);
        Ok(())
    }

    /// Binds a client-facing connection to a server-facing one. From here on
    /// packets received on either side forward to the other unless a hook
    /// says otherwise.
    pub fn pair(&self, client_id: u64, server_id: u64) -> Result<()> {
        let client = self.conn(client_id).context("no such client connection")?;
        let server = self.conn(server_id).context("no such server connection")?;
        {
            let c = client.borrow();
            if c.role != Role::Client || !c.alive {
                bail!("connection {client_id} is not a live client");
            }
            let s = server.borrow();
            if s.role != Role::Server || !s.alive {
                bail!("connection {server_id} is not a live backend");
            }
        }
        {
            let mut c = client.borrow_mut();
            c.remote = Rc::downgrade(&server);
            c.remote_id = server_id;
        }
        {
            let mut s = server.borrow_mut();
            s.remote = Rc::downgrade(&client);
            s.remote_id = client_id;
        }
        debug!(client = client_id, server = server_id, "paired");
        Ok(())
    }

    /// Severs a pairing from either end.
    pub fn unpair(&self, id: u64) -> Result<()> {
        let conn = self.conn(id).context("no such connection")?;
        if conn.borrow().remote.upgrade().is_none() {
            bail!("connection {id} is not paired");
        }
        self.sever(&conn);
        Ok(())
    }

    /// Tears a connection down: fires the closing hook once, severs any
    /// pairing, releases the socket and buffers. Safe to call repeatedly.
    pub fn close(&self, id: u64) {
        let Some(conn) = self.conn(id) else { return };
        {
            let mut c = conn.borrow_mut();
            if !c.alive {
                return;
            }
            c.alive = false;
            c.machine.state = State::Closing;
        }
        self.inner.hooks.on_close(self, id);
        self.sever(&conn);
        self.inner.conns.borrow_mut().remove(&id);
        let notify = {
            let mut c = conn.borrow_mut();
            c.stream = None;
            c.rbuf = BytesMut::new();
            c.wbuf = BytesMut::new();
            c.notify.clone()
        };
        // Wake the I/O task so it can drop its handle and exit.
        notify.notify_one();
        // The closing hook may have wired farewell packets to other
        // connections.
        self.drain_flush_list();
        debug!(conn = id, "closed connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::machine::Side;
    use std::cell::Cell;

    struct Quiet;
    impl ScriptHooks for Quiet {}

    fn raw_packet(payload: &[u8], seq: u8) -> BytesMut {
        let mut buf = BytesMut::new();
        frame::write_header(&mut buf, payload.len(), seq);
        buf.extend_from_slice(payload);
        buf
    }

    fn test_pair(proxy: &Proxy) -> (ConnRef, ConnRef) {
        let client = proxy.register(Conn::new(
            proxy.alloc_id(),
            Role::Client,
            IoState::Reading,
            None,
        ));
        let server = proxy.register(Conn::new(
            proxy.alloc_id(),
            Role::Server,
            IoState::Reading,
            None,
        ));
        let (cid, sid) = (client.borrow().id, server.borrow().id);
        proxy.pair(cid, sid).unwrap();
        (client, server)
    }

    #[test]
    fn forwarding_rewrites_sequence_byte() {
        let proxy = Proxy::new(Quiet);
        let (client, server) = test_pair(&proxy);

        client.borrow_mut().machine.state = State::ClientSentCommand;
        client.borrow_mut().machine.seq = 5;
        server.borrow_mut().machine.seq = 2;

        // One 40-byte wire packet (36-byte payload).
        let mut buf = raw_packet(&[0x07; 36], 5);
        let original = buf.to_vec();
        let frame = frame::next_frame(&mut buf).unwrap().unwrap();

        let kind = client
            .borrow_mut()
            .machine
            .received(frame.first_byte(), frame.payload_len());
        assert_eq!(kind, PacketKind::Opaque);
        proxy.forward(&client, &frame, kind, None);

        assert_eq!(client.borrow().machine.seq, 6);
        assert_eq!(server.borrow().machine.seq, 3);

        let s = server.borrow();
        assert_eq!(s.wbuf.len(), 40);
        assert_eq!(s.wbuf[3], 2);
        assert_eq!(&s.wbuf[..3], &original[..3]);
        assert_eq!(&s.wbuf[4..], &original[4..]);
        assert!(s.in_flush_list);
    }

    #[test]
    fn forwarded_stream_matches_source_modulo_seq_bytes() {
        let proxy = Proxy::new(Quiet);
        let (client, server) = test_pair(&proxy);
        client.borrow_mut().machine.state = State::ClientSentCommand;
        server.borrow_mut().machine.seq = 7;

        let payloads: [&[u8]; 3] = [&[0x11; 10], &[0x22; 3], &[0x33; 25]];
        let mut source_stream = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let mut buf = raw_packet(payload, i as u8);
            source_stream.extend_from_slice(&buf);
            let frame = frame::next_frame(&mut buf).unwrap().unwrap();
            let kind = client
                .borrow_mut()
                .machine
                .received(frame.first_byte(), frame.payload_len());
            proxy.forward(&client, &frame, kind, None);
        }

        let s = server.borrow();
        assert_eq!(s.wbuf.len(), source_stream.len());
        let seq_positions = [3usize, 3 + 14, 3 + 14 + 7];
        let mut expected_seq = 7u8;
        for (i, (got, want)) in s.wbuf.iter().zip(source_stream.iter()).enumerate() {
            if seq_positions.contains(&i) {
                assert_eq!(*got, expected_seq, "sequence byte at {i}");
                expected_seq += 1;
            } else {
                assert_eq!(got, want, "payload byte at {i}");
            }
        }
    }

    #[test]
    fn receive_pass_drives_machine_and_captures_field_count() {
        let proxy = Proxy::new(Quiet);
        let conn = proxy.register(Conn::new(
            proxy.alloc_id(),
            Role::Server,
            IoState::Reading,
            None,
        ));
        conn.borrow_mut().machine.state = State::ServerSendingResultSet;
        conn.borrow_mut().machine.last_cmd = crate::protocol::packet::Command::Query;

        conn.borrow_mut().rbuf.extend_from_slice(&raw_packet(&[0x02], 1));
        proxy.process_read(&conn).unwrap();

        let c = conn.borrow();
        assert_eq!(c.machine.state, State::ServerSentResultSet);
        assert_eq!(c.machine.field_count, 2);
    }

    #[test]
    fn protocol_violation_surfaces_from_receive_pass() {
        let proxy = Proxy::new(Quiet);
        let conn = proxy.register(Conn::new(
            proxy.alloc_id(),
            Role::Server,
            IoState::Reading,
            None,
        ));
        // A greeting advertising protocol version 9.
        let mut greeting = vec![9u8];
        greeting.extend_from_slice(b"4.0.0\0");
        conn.borrow_mut()
            .rbuf
            .extend_from_slice(&raw_packet(&greeting, 0));
        assert!(proxy.process_read(&conn).is_err());
    }

    #[test]
    fn close_fires_hook_once_and_severs_pairing() {
        struct Counting {
            closes: Rc<Cell<u32>>,
        }
        impl ScriptHooks for Counting {
            fn on_close(&self, _proxy: &Proxy, _conn: u64) {
                self.closes.set(self.closes.get() + 1);
            }
        }

        let closes = Rc::new(Cell::new(0));
        let proxy = Proxy::new(Counting {
            closes: closes.clone(),
        });
        let (client, server) = test_pair(&proxy);
        let (cid, sid) = (client.borrow().id, server.borrow().id);

        proxy.close(cid);
        proxy.close(cid);

        assert_eq!(closes.get(), 1);
        assert!(!client.borrow().alive);
        assert_eq!(client.borrow().machine.state, State::Closing);
        assert!(client.borrow().remote.upgrade().is_none());
        assert!(server.borrow().remote.upgrade().is_none());
        assert_eq!(server.borrow().remote_id, 0);
        assert!(proxy.conn(cid).is_none());
        assert!(proxy.is_alive(sid));
    }

    #[test]
    fn write_packet_rejects_closed_connections() {
        let proxy = Proxy::new(Quiet);
        let (client, _server) = test_pair(&proxy);
        let cid = client.borrow().id;
        proxy.close(cid);
        let err = proxy.write_packet(
            cid,
            &Packet::Ok(crate::protocol::packet::OkPacket::default()),
        );
        assert!(err.is_err());
    }

    #[test]
    fn pair_validates_roles() {
        let proxy = Proxy::new(Quiet);
        let (client, server) = test_pair(&proxy);
        let (cid, sid) = (client.borrow().id, server.borrow().id);
        assert!(proxy.pair(sid, cid).is_err());
        assert!(proxy.pair(cid, cid).is_err());

        proxy.unpair(cid).unwrap();
        assert!(proxy.unpair(sid).is_err());
        assert_eq!(proxy.remote_of(cid), None);
    }

    #[test]
    fn write_packet_enqueues_and_advances_machine() {
        let proxy = Proxy::new(Quiet);
        let (client, _server) = test_pair(&proxy);
        let cid = client.borrow().id;

        let hs = crate::protocol::packet::HandshakePacket::new();
        proxy.write_packet(cid, &Packet::Handshake(hs)).unwrap();

        let c = client.borrow();
        assert_eq!(c.machine.state, State::ClientWaitAuth);
        assert_eq!(c.machine.seq, 1);
        assert_eq!(c.wbuf.len(), 56);
        assert_eq!(c.wbuf[3], 0);
        assert_eq!(c.machine.side, Side::Client);
    }

    #[test]
    fn unix_listener_applies_mode_and_unlinks_stale_socket() {
        let rt = runtime();
        let local = tokio::task::LocalSet::new();
        rt.block_on(local.run_until(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("interpose.sock");
            let proxy = Proxy::new(Quiet);

            let id = proxy.listen_unix(&path, 0o700).unwrap();
            let meta = fs::metadata(&path).unwrap();
            assert!(meta.file_type().is_socket());
            assert_eq!(meta.permissions().mode() & 0o777, 0o700);

            proxy.close(id);
            // The stale path is unlinked and rebound.
            let id = proxy.listen_unix(&path, 0o770).unwrap();
            let meta = fs::metadata(&path).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o770);
            proxy.close(id);
        }));
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }
}
