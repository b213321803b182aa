//! The per-connection protocol automaton. MySQL response packets carry no
//! discriminator tag, so the decoder for the next packet falls out of the
//! current state plus the first payload byte, and the successor state falls
//! out of the last command sent.

use tracing::warn;

use crate::protocol::packet::{Command, PacketKind};

/// Which end of the proxied exchange this connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Accepted from a listener; the proxy plays server.
    Client,
    /// Opened toward a backend; the proxy plays client.
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    // Client-facing.
    ClientWaitHandshake,
    ClientWaitAuth,
    ClientWaiting,
    ClientSentCommand,
    // Server-facing.
    ServerConnect,
    ServerWaitAuth,
    ServerSendingOk,
    ServerWaitCommand,
    ServerGotCommand,
    ServerSendingResultSet,
    ServerSentResultSet,
    ServerSendingFields,
    ServerSentFields,
    ServerSendingRows,
    ServerSendingStats,
    ServerRecvError,
    // Shared terminal state.
    Closing,
}

/// An EOF is only an EOF when the payload is short enough; 0xfe also leads
/// rows and field descriptors.
const EOF_MAX_PAYLOAD: usize = 9;

#[derive(Debug)]
pub struct Machine {
    pub side: Side,
    pub state: State,
    pub last_cmd: Command,
    pub seq: u8,
    pub field_count: u64,
}

impl Machine {
    pub fn new(side: Side) -> Self {
        Machine {
            side,
            state: match side {
                Side::Client => State::ClientWaitHandshake,
                Side::Server => State::ServerConnect,
            },
            last_cmd: Command::Other(0),
            seq: 0,
            field_count: 0,
        }
    }

    /// Whether a frame's sequence byte is the one this connection expects. A
    /// client-facing frame numbered 0 is tolerated: clients restart the
    /// sequence at every command boundary.
    pub fn sequence_ok(&self, wire_seq: u8) -> bool {
        wire_seq == self.seq || (self.side == Side::Client && wire_seq == 0)
    }

    /// Drives the receive side: picks the decoder for a packet that just
    /// arrived and advances to the successor state. Call once per frame.
    pub fn received(&mut self, first_byte: u8, payload_len: usize) -> PacketKind {
        self.seq = self.seq.wrapping_add(1);
        match self.side {
            Side::Client => self.client_received(),
            Side::Server => self.server_received(first_byte, payload_len),
        }
    }

    fn client_received(&mut self) -> PacketKind {
        match self.state {
            State::ClientWaitAuth => {
                self.state = State::ClientWaiting;
                PacketKind::Auth
            }
            State::ClientWaiting => {
                self.state = State::ClientSentCommand;
                // The backend numbers its replies from 1.
                self.seq = 1;
                PacketKind::Command
            }
            _ => PacketKind::Opaque,
        }
    }

    fn server_received(&mut self, first_byte: u8, payload_len: usize) -> PacketKind {
        // Transition markers: the previous packet finished a phase.
        match self.state {
            State::ServerSentResultSet => self.state = State::ServerSendingFields,
            State::ServerSentFields => self.state = State::ServerSendingRows,
            _ => {}
        }

        // A freshly dispatched command decides what the reply stream holds.
        if self.state == State::ServerGotCommand {
            self.state = match self.last_cmd {
                Command::Query => State::ServerSendingResultSet,
                Command::FieldList => State::ServerSendingFields,
                Command::InitDb | Command::Quit => State::ServerSendingOk,
                Command::Statistics => State::ServerSendingStats,
                other => {
                    warn!(opcode = other.opcode(), "no reply dispatch for command");
                    State::ServerWaitCommand
                }
            };
        }

        let is_eof = first_byte == 0xfe && payload_len < EOF_MAX_PAYLOAD;

        let kind = match self.state {
            State::ServerConnect => {
                self.state = State::ServerWaitAuth;
                PacketKind::Handshake
            }
            State::ServerSendingOk => match first_byte {
                0xff => PacketKind::Err,
                _ => {
                    self.state = State::ServerWaitCommand;
                    PacketKind::Ok
                }
            },
            State::ServerSendingResultSet => match first_byte {
                0x00 => {
                    self.state = State::ServerWaitCommand;
                    PacketKind::Ok
                }
                0xff => PacketKind::Err,
                _ => {
                    self.state = State::ServerSentResultSet;
                    PacketKind::ResultSetHeader
                }
            },
            State::ServerSendingFields => {
                if is_eof {
                    self.state = if self.last_cmd == Command::Query {
                        State::ServerSentFields
                    } else {
                        State::ServerWaitCommand
                    };
                    PacketKind::Eof
                } else if first_byte == 0xff {
                    PacketKind::Err
                } else {
                    PacketKind::Field
                }
            }
            State::ServerSendingRows => {
                if is_eof {
                    self.state = State::ServerWaitCommand;
                    PacketKind::Eof
                } else if first_byte == 0xff {
                    PacketKind::Err
                } else {
                    PacketKind::Row
                }
            }
            State::ServerSendingStats => {
                self.state = State::ServerWaitCommand;
                PacketKind::Stats
            }
            // Pipelined traffic while no command is outstanding passes
            // through undecoded.
            _ => PacketKind::Opaque,
        };

        if kind == PacketKind::Err {
            self.state = State::ServerRecvError;
        }
        if matches!(self.state, State::ServerRecvError | State::ServerWaitCommand) {
            self.seq = 0;
        }
        kind
    }

    /// Drives the send side: advances state for a packet about to go out on
    /// this connection and returns the sequence byte to stamp on its header.
    pub fn sent(&mut self, kind: PacketKind, command: Option<Command>) -> u8 {
        // Dispatching a command restarts the sequence stream.
        if self.side == Side::Server
            && kind == PacketKind::Command
            && matches!(self.state, State::ServerWaitCommand | State::ServerRecvError)
        {
            self.seq = 0;
        }
        let wire_seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        match self.side {
            Side::Client => match self.state {
                State::ClientWaitHandshake if kind == PacketKind::Handshake => {
                    self.state = State::ClientWaitAuth;
                }
                State::ClientSentCommand => self.state = State::ClientWaiting,
                _ => {}
            },
            Side::Server => match self.state {
                State::ServerWaitAuth if kind == PacketKind::Auth => {
                    self.state = State::ServerSendingOk;
                }
                State::ServerWaitCommand | State::ServerRecvError
                    if kind == PacketKind::Command =>
                {
                    if let Some(command) = command {
                        self.last_cmd = command;
                    }
                    self.state = State::ServerGotCommand;
                }
                _ => {}
            },
        }

        wire_seq
    }
}
