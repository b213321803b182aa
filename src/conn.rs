//! The per-connection runtime entity: socket handle, growable read/write
//! buffers, protocol machine, pairing link and liveness bookkeeping.

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};

use bytes::{Buf, BytesMut};
use tokio::io::{Interest, Ready};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Notify;

use crate::protocol::machine::{Machine, Side};

/// Both buffers start here; the read buffer doubles when full and the write
/// buffer grows to the next power of two that fits.
pub const INITIAL_BUF_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Listener,
    Client,
    Server,
}

/// Socket-level state, distinct from the protocol state: outbound sockets
/// spend their first moments connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Connecting,
    Reading,
}

/// A proxied data socket, TCP or Unix-domain. Readiness and the nonblocking
/// read/write calls all take `&self`, so the reactor shares it via `Rc`.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    pub async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        match self {
            Stream::Tcp(s) => s.ready(interest).await,
            Stream::Unix(s) => s.ready(interest).await,
        }
    }

    fn try_read_buf(&self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_read_buf(buf),
            Stream::Unix(s) => s.try_read_buf(buf),
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_write(buf),
            Stream::Unix(s) => s.try_write(buf),
        }
    }
}

/// What one readiness-driven drain of the socket produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// EOF before any new bytes this pass: the peer went away.
    Closed,
    /// Read `n` new bytes (possibly zero) and would now block.
    Data(usize),
}

pub type ConnRef = Rc<RefCell<Conn>>;

pub struct Conn {
    pub id: u64,
    pub role: Role,
    pub io_state: IoState,
    /// Absent on listeners and on outbound connections still connecting.
    pub stream: Option<Rc<Stream>>,
    pub rbuf: BytesMut,
    pub wbuf: BytesMut,
    pub machine: Machine,
    /// Paired peer, if any. The weak link plus the recorded id guard against
    /// dereferencing a reused slot after a teardown race.
    pub remote: Weak<RefCell<Conn>>,
    pub remote_id: u64,
    pub alive: bool,
    pub in_flush_list: bool,
    /// Wakes this connection's I/O task when bytes were queued for it or it
    /// was closed from elsewhere.
    pub notify: Rc<Notify>,
}

impl Conn {
    pub fn new(id: u64, role: Role, io_state: IoState, stream: Option<Rc<Stream>>) -> Self {
        let side = match role {
            Role::Server => Side::Server,
            _ => Side::Client,
        };
        // Listeners only accept; they never buffer packet data.
        let (rbuf, wbuf) = if role == Role::Listener {
            (BytesMut::new(), BytesMut::new())
        } else {
            (
                BytesMut::with_capacity(INITIAL_BUF_SIZE),
                BytesMut::with_capacity(INITIAL_BUF_SIZE),
            )
        };
        Conn {
            id,
            role,
            io_state,
            stream,
            rbuf,
            wbuf,
            machine: Machine::new(side),
            remote: Weak::new(),
            remote_id: 0,
            alive: true,
            in_flush_list: false,
            notify: Rc::new(Notify::new()),
        }
    }

    pub fn has_pending_write(&self) -> bool {
        !self.wbuf.is_empty()
    }

    /// Makes room for `additional` outgoing bytes, rounding the required
    /// capacity up to the next power of two.
    pub fn reserve_write(&mut self, additional: usize) {
        let needed = self.wbuf.len() + additional;
        if needed > self.wbuf.capacity() {
            let target = needed.next_power_of_two();
            self.wbuf.reserve(target - self.wbuf.len());
        }
    }

    /// Drains the socket into the read buffer until it would block, doubling
    /// the buffer whenever it fills.
    pub fn fill_read(&mut self) -> io::Result<ReadOutcome> {
        let Some(stream) = self.stream.clone() else {
            return Ok(ReadOutcome::Data(0));
        };
        let mut newdata = 0usize;
        loop {
            if self.rbuf.capacity() - self.rbuf.len() == 0 {
                let grow = self.rbuf.capacity().max(INITIAL_BUF_SIZE);
                self.rbuf.reserve(grow);
            }
            match stream.try_read_buf(&mut self.rbuf) {
                Ok(0) => {
                    return Ok(if newdata == 0 {
                        ReadOutcome::Closed
                    } else {
                        ReadOutcome::Data(newdata)
                    });
                }
                Ok(n) => newdata += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Data(newdata));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes as much buffered output as the socket accepts right now.
    /// Returns whether the buffer drained completely.
    pub fn try_flush(&mut self) -> io::Result<bool> {
        let Some(stream) = self.stream.clone() else {
            // Still connecting; the bytes stay queued for later.
            return Ok(self.wbuf.is_empty());
        };
        while !self.wbuf.is_empty() {
            match stream.try_write(&self.wbuf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.wbuf.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        // Fully drained: reset the cursors, keep the capacity.
        self.wbuf.clear();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffer_grows_in_powers_of_two() {
        let mut c = Conn::new(1, Role::Client, IoState::Reading, None);
        assert_eq!(c.wbuf.capacity(), INITIAL_BUF_SIZE);

        c.wbuf.extend_from_slice(&[0u8; 100]);
        c.reserve_write(3000);
        assert!(c.wbuf.capacity() >= 4096);

        c.reserve_write(100_000);
        assert!(c.wbuf.capacity() >= (100 + 100_000usize).next_power_of_two());
    }

    #[test]
    fn listener_conns_carry_no_buffers() {
        let c = Conn::new(1, Role::Listener, IoState::Reading, None);
        assert_eq!(c.rbuf.capacity(), 0);
        assert_eq!(c.wbuf.capacity(), 0);
    }

    #[test]
    fn machine_side_follows_role() {
        use crate::protocol::machine::State;
        let c = Conn::new(1, Role::Client, IoState::Reading, None);
        assert_eq!(c.machine.state, State::ClientWaitHandshake);
        let s = Conn::new(2, Role::Server, IoState::Connecting, None);
        assert_eq!(s.machine.state, State::ServerConnect);
    }

    #[test]
    fn flush_without_stream_keeps_bytes_queued() {
        let mut c = Conn::new(1, Role::Server, IoState::Connecting, None);
        c.wbuf.extend_from_slice(b"queued");
        assert!(!c.try_flush().unwrap());
        assert_eq!(&c.wbuf[..], b"queued");
    }
}
