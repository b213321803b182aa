//! Typed, owned forms of every supported packet kind, with per-kind decode
//! and encode. Decode always works on one framed payload; encode appends a
//! complete packet (header included) to a write buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::frame;
use crate::protocol::wire::{
    self, LENENC_NULL, read_lenenc_bytes, read_lenenc_int, read_nul_string, read_trailing_string,
    write_lenenc_bytes, write_lenenc_int,
};

// Capability flags advertised in the handshake.
pub const CLIENT_LONG_PASSWORD: u16 = 1;
pub const CLIENT_LONG_FLAG: u16 = 4;
pub const CLIENT_CONNECT_WITH_DB: u16 = 8;
pub const CLIENT_PROTOCOL_41: u16 = 512;
pub const CLIENT_TRANSACTIONS: u16 = 8192;
pub const CLIENT_SECURE_CONNECTION: u16 = 32768;

pub const DEFAULT_CAPABILITIES: u16 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION;

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 2;

pub const PROTOCOL_VERSION: u8 = 10;
pub const SERVER_VERSION: &str = "5.0.37";
pub const DEFAULT_CHARSET: u8 = 8;
pub const SCRAMBLE_LEN: usize = 20;

pub const MAX_SERVER_VERSION_LEN: usize = 60;
pub const MAX_USERNAME_LEN: usize = 16;
pub const MAX_ERR_MESSAGE_LEN: usize = 512;

/// Command opcodes the state machine dispatches on. Anything else passes
/// through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb,
    Query,
    FieldList,
    Statistics,
    Other(u8),
}

impl Command {
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            1 => Command::Quit,
            2 => Command::InitDb,
            3 => Command::Query,
            4 => Command::FieldList,
            9 => Command::Statistics,
            other => Command::Other(other),
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            Command::Quit => 1,
            Command::InitDb => 2,
            Command::Query => 3,
            Command::FieldList => 4,
            Command::Statistics => 9,
            Command::Other(other) => other,
        }
    }
}

/// What the state machine decided the next packet is. `Stats` and `Opaque`
/// payloads carry no typed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Handshake,
    Auth,
    Ok,
    Err,
    Command,
    ResultSetHeader,
    Field,
    Row,
    Eof,
    Stats,
    Opaque,
}

/// Initial handshake, server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: [u8; SCRAMBLE_LEN],
    pub capabilities: u16,
    pub charset: u8,
    pub status: u16,
}

impl HandshakePacket {
    /// A greeting the proxy can present as its own, with a fresh challenge.
    pub fn new() -> Self {
        HandshakePacket {
            protocol_version: PROTOCOL_VERSION,
            server_version: SERVER_VERSION.to_string(),
            thread_id: 1,
            scramble: crate::auth::generate_challenge(),
            capabilities: DEFAULT_CAPABILITIES,
            charset: DEFAULT_CHARSET,
            status: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 1, "protocol version")?;
        let protocol_version = p.get_u8();
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::BadProtocolVersion(protocol_version));
        }

        let server_version = read_nul_string(&mut p, "server version")?;
        if server_version.len() + 1 > MAX_SERVER_VERSION_LEN {
            return Err(ProtocolError::ServerVersionTooLong(MAX_SERVER_VERSION_LEN));
        }

        wire::need(&p, 4 + 8 + 1 + 2 + 1 + 2 + 13 + 13, "handshake body")?;
        let thread_id = p.get_u32_le();

        let mut scramble = [0u8; SCRAMBLE_LEN];
        p.copy_to_slice(&mut scramble[..8]);
        p.advance(1); // filler

        let capabilities = p.get_u16_le();
        let charset = p.get_u8();
        let status = p.get_u16_le();
        p.advance(13); // zero filler

        // Rest of the challenge plus its NUL separator.
        p.copy_to_slice(&mut scramble[8..]);
        p.advance(1);

        Ok(HandshakePacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            capabilities,
            charset,
            status,
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(self.protocol_version);
        dst.put_slice(self.server_version.as_bytes());
        dst.put_u8(0);
        dst.put_u32_le(self.thread_id);
        dst.put_slice(&self.scramble[..8]);
        dst.put_u8(0); // filler
        dst.put_u16_le(self.capabilities);
        dst.put_u8(self.charset);
        dst.put_u16_le(self.status);
        dst.put_slice(&[0u8; 13]);
        dst.put_slice(&self.scramble[8..]);
        dst.put_u8(0);
    }
}

impl Default for HandshakePacket {
    fn default() -> Self {
        HandshakePacket::new()
    }
}

/// Client response to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    pub client_flags: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub scramble: Option<[u8; SCRAMBLE_LEN]>,
    pub database: Option<String>,
}

impl Default for AuthPacket {
    fn default() -> Self {
        AuthPacket {
            client_flags: DEFAULT_CAPABILITIES as u32,
            max_packet_size: 16_777_216,
            charset: DEFAULT_CHARSET,
            username: String::new(),
            scramble: None,
            database: None,
        }
    }
}

impl AuthPacket {
    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 4 + 4 + 1 + 23, "auth header")?;
        let client_flags = p.get_u32_le();
        let max_packet_size = p.get_u32_le();
        let charset = p.get_u8();
        p.advance(23); // zero filler

        let username = read_nul_string(&mut p, "username")?;
        if username.len() > MAX_USERNAME_LEN {
            return Err(ProtocolError::UsernameTooLong(MAX_USERNAME_LEN));
        }

        let scramble = if p.has_remaining() {
            match p.get_u8() {
                0 => None,
                len @ 20 => {
                    wire::need(&p, len as usize, "auth scramble")?;
                    let mut s = [0u8; SCRAMBLE_LEN];
                    p.copy_to_slice(&mut s);
                    Some(s)
                }
                other => return Err(ProtocolError::BadScrambleLength(other)),
            }
        } else {
            None
        };

        let database = if p.has_remaining() {
            Some(read_trailing_string(&mut p))
        } else {
            None
        };

        Ok(AuthPacket {
            client_flags,
            max_packet_size,
            charset,
            username,
            scramble,
            database,
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u32_le(self.client_flags);
        dst.put_u32_le(self.max_packet_size);
        dst.put_u8(self.charset);
        dst.put_slice(&[0u8; 23]);
        dst.put_slice(self.username.as_bytes());
        dst.put_u8(0);
        match &self.scramble {
            Some(s) => {
                dst.put_u8(SCRAMBLE_LEN as u8);
                dst.put_slice(s);
            }
            None => dst.put_u8(0),
        }
        if let Some(db) = &self.database {
            dst.put_slice(db.as_bytes());
            dst.put_u8(0);
        }
    }
}

/// OK response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub insert_id: u64,
    pub status: u16,
    pub warnings: u16,
    pub message: Option<Bytes>,
}

impl Default for OkPacket {
    fn default() -> Self {
        OkPacket {
            affected_rows: 0,
            insert_id: 0,
            status: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            message: None,
        }
    }
}

impl OkPacket {
    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 1, "ok marker")?;
        p.advance(1); // 0x00 field count byte
        let affected_rows = read_lenenc_int(&mut p)?;
        let insert_id = read_lenenc_int(&mut p)?;
        wire::need(&p, 4, "ok status")?;
        let status = p.get_u16_le();
        let warnings = p.get_u16_le();

        let message = if p.has_remaining() {
            let len = read_lenenc_int(&mut p)?;
            if len == 0 || len == LENENC_NULL {
                None
            } else {
                let len = len as usize;
                wire::need(&p, len, "ok message")?;
                Some(Bytes::copy_from_slice(&p[..len]))
            }
        } else {
            None
        };

        Ok(OkPacket {
            affected_rows,
            insert_id,
            status,
            warnings,
            message,
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(0x00);
        write_lenenc_int(dst, self.affected_rows);
        write_lenenc_int(dst, self.insert_id);
        dst.put_u16_le(self.status);
        dst.put_u16_le(self.warnings);
        if let Some(message) = &self.message {
            write_lenenc_bytes(dst, message);
        }
    }
}

/// ERR response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub errnum: u16,
    pub sqlstate: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    pub fn new(errnum: u16, sqlstate: &[u8; 5], message: &str) -> Self {
        ErrPacket {
            errnum,
            sqlstate: *sqlstate,
            message: message.to_string(),
        }
    }

    /// The stock refusal a gatekeeping hook sends before closing a client.
    pub fn access_denied(user: &str) -> Self {
        ErrPacket::new(
            1045,
            b"28000",
            &format!("Access denied for user '{user}'"),
        )
    }

    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 1 + 2 + 1 + 5, "err header")?;
        p.advance(1); // 0xff field count byte
        let errnum = p.get_u16_le();
        p.advance(1); // '#' marker
        let mut sqlstate = [0u8; 5];
        p.copy_to_slice(&mut sqlstate);

        if p.remaining() > MAX_ERR_MESSAGE_LEN {
            return Err(ProtocolError::ErrMessageTooLong(MAX_ERR_MESSAGE_LEN));
        }
        let message = String::from_utf8_lossy(p).into_owned();

        Ok(ErrPacket {
            errnum,
            sqlstate,
            message,
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(0xff);
        dst.put_u16_le(self.errnum);
        dst.put_u8(b'#');
        dst.put_slice(&self.sqlstate);
        dst.put_slice(self.message.as_bytes());
    }
}

/// A command from a client. The argument carries no terminator on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub command: Command,
    pub argument: Bytes,
}

impl CommandPacket {
    pub fn query(sql: &str) -> Self {
        CommandPacket {
            command: Command::Query,
            argument: Bytes::copy_from_slice(sql.as_bytes()),
        }
    }

    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 1, "command opcode")?;
        let command = Command::from_opcode(p.get_u8());
        let argument = Bytes::copy_from_slice(p);
        Ok(CommandPacket { command, argument })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(self.command.opcode());
        dst.put_slice(&self.argument);
    }
}

/// Result-set header: the field count, before the field descriptor stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSetHeaderPacket {
    pub field_count: u64,
    pub extra: Option<u64>,
}

impl ResultSetHeaderPacket {
    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        let field_count = read_lenenc_int(&mut p)?;
        let extra = if p.has_remaining() {
            Some(read_lenenc_int(&mut p)?)
        } else {
            None
        };
        Ok(ResultSetHeaderPacket { field_count, extra })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        write_lenenc_int(dst, self.field_count);
        if let Some(extra) = self.extra {
            write_lenenc_int(dst, extra);
        }
    }
}

/// One column descriptor of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPacket {
    pub catalog: Bytes,
    pub db: Bytes,
    pub table: Bytes,
    pub org_table: Bytes,
    pub name: Bytes,
    pub org_name: Bytes,
    pub charset: u16,
    pub length: u32,
    pub field_type: u8,
    pub flags: u16,
    pub decimals: u8,
    pub default: Option<Bytes>,
}

impl FieldPacket {
    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        let catalog = read_lenenc_bytes(&mut p)?;
        let db = read_lenenc_bytes(&mut p)?;
        let table = read_lenenc_bytes(&mut p)?;
        let org_table = read_lenenc_bytes(&mut p)?;
        let name = read_lenenc_bytes(&mut p)?;
        let org_name = read_lenenc_bytes(&mut p)?;

        wire::need(&p, 1 + 2 + 4 + 1 + 2 + 1 + 2, "field descriptor tail")?;
        p.advance(1); // fixed-length filler, 0x0c
        let charset = p.get_u16_le();
        let length = p.get_u32_le();
        let field_type = p.get_u8();
        let flags = p.get_u16_le();
        let decimals = p.get_u8();
        p.advance(2); // filler

        let default = if p.has_remaining() {
            Some(read_lenenc_bytes(&mut p)?)
        } else {
            None
        };

        Ok(FieldPacket {
            catalog,
            db,
            table,
            org_table,
            name,
            org_name,
            charset,
            length,
            field_type,
            flags,
            decimals,
            default,
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        write_lenenc_bytes(dst, &self.catalog);
        write_lenenc_bytes(dst, &self.db);
        write_lenenc_bytes(dst, &self.table);
        write_lenenc_bytes(dst, &self.org_table);
        write_lenenc_bytes(dst, &self.name);
        write_lenenc_bytes(dst, &self.org_name);
        dst.put_u8(0x0c);
        dst.put_u16_le(self.charset);
        dst.put_u32_le(self.length);
        dst.put_u8(self.field_type);
        dst.put_u16_le(self.flags);
        dst.put_u8(self.decimals);
        dst.put_u16_le(0);
        if let Some(default) = &self.default {
            write_lenenc_bytes(dst, default);
        }
    }
}

/// One result-set row, kept as the raw packed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPacket {
    pub data: Bytes,
}

impl RowPacket {
    fn decode(p: &[u8]) -> Result<Self, ProtocolError> {
        Ok(RowPacket {
            data: Bytes::copy_from_slice(p),
        })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.data);
    }
}

/// EOF marker terminating a field or row stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EofPacket {
    pub warnings: u16,
    pub status: u16,
}

impl EofPacket {
    fn decode(mut p: &[u8]) -> Result<Self, ProtocolError> {
        wire::need(&p, 1 + 2 + 2, "eof body")?;
        p.advance(1); // 0xfe marker
        let warnings = p.get_u16_le();
        let status = p.get_u16_le();
        Ok(EofPacket { warnings, status })
    }

    fn encode_payload(&self, dst: &mut BytesMut) {
        dst.put_u8(0xfe);
        dst.put_u16_le(self.warnings);
        dst.put_u16_le(self.status);
    }
}

/// A decoded packet record. Owned by the receive pass unless handed to the
/// hook layer, which may mutate it before deciding what happens to the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Handshake(HandshakePacket),
    Auth(AuthPacket),
    Ok(OkPacket),
    Err(ErrPacket),
    Command(CommandPacket),
    ResultSetHeader(ResultSetHeaderPacket),
    Field(FieldPacket),
    Row(RowPacket),
    Eof(EofPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Handshake(_) => PacketKind::Handshake,
            Packet::Auth(_) => PacketKind::Auth,
            Packet::Ok(_) => PacketKind::Ok,
            Packet::Err(_) => PacketKind::Err,
            Packet::Command(_) => PacketKind::Command,
            Packet::ResultSetHeader(_) => PacketKind::ResultSetHeader,
            Packet::Field(_) => PacketKind::Field,
            Packet::Row(_) => PacketKind::Row,
            Packet::Eof(_) => PacketKind::Eof,
        }
    }

    /// The command opcode, when this is a command packet.
    pub fn command(&self) -> Option<Command> {
        match self {
            Packet::Command(cmd) => Some(cmd.command),
            _ => None,
        }
    }

    /// Decodes one framed payload into the record `kind` calls for. Kinds
    /// without a typed form (stats responses, pass-through payloads) yield
    /// `None`.
    pub fn decode(kind: PacketKind, payload: &[u8]) -> Result<Option<Packet>, ProtocolError> {
        Ok(Some(match kind {
            PacketKind::Handshake => Packet::Handshake(HandshakePacket::decode(payload)?),
            PacketKind::Auth => Packet::Auth(AuthPacket::decode(payload)?),
            PacketKind::Ok => Packet::Ok(OkPacket::decode(payload)?),
            PacketKind::Err => Packet::Err(ErrPacket::decode(payload)?),
            PacketKind::Command => Packet::Command(CommandPacket::decode(payload)?),
            PacketKind::ResultSetHeader => {
                Packet::ResultSetHeader(ResultSetHeaderPacket::decode(payload)?)
            }
            PacketKind::Field => Packet::Field(FieldPacket::decode(payload)?),
            PacketKind::Row => Packet::Row(RowPacket::decode(payload)?),
            PacketKind::Eof => Packet::Eof(EofPacket::decode(payload)?),
            PacketKind::Stats | PacketKind::Opaque => return Ok(None),
        }))
    }

    /// Appends this record as a complete wire packet with sequence `seq`.
    pub fn encode(&self, seq: u8, dst: &mut BytesMut) {
        let mut payload = BytesMut::new();
        match self {
            Packet::Handshake(p) => p.encode_payload(&mut payload),
            Packet::Auth(p) => p.encode_payload(&mut payload),
            Packet::Ok(p) => p.encode_payload(&mut payload),
            Packet::Err(p) => p.encode_payload(&mut payload),
            Packet::Command(p) => p.encode_payload(&mut payload),
            Packet::ResultSetHeader(p) => p.encode_payload(&mut payload),
            Packet::Field(p) => p.encode_payload(&mut payload),
            Packet::Row(p) => p.encode_payload(&mut payload),
            Packet::Eof(p) => p.encode_payload(&mut payload),
        }
        frame::write_header(dst, payload.len(), seq);
        dst.put_slice(&payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::next_frame;

    fn roundtrip(kind: PacketKind, packet: Packet) -> Packet {
        let mut buf = BytesMut::new();
        packet.encode(0, &mut buf);
        let frame = next_frame(&mut buf).unwrap().unwrap();
        Packet::decode(kind, frame.payload()).unwrap().unwrap()
    }

    #[test]
    fn handshake_roundtrip() {
        let mut scramble = [0u8; SCRAMBLE_LEN];
        for (i, b) in scramble.iter_mut().enumerate() {
            *b = 0x41 + i as u8;
        }
        let hs = HandshakePacket {
            protocol_version: 10,
            server_version: "5.0.37".to_string(),
            thread_id: 1,
            scramble,
            capabilities: DEFAULT_CAPABILITIES,
            charset: 8,
            status: 2,
        };

        let mut buf = BytesMut::new();
        Packet::Handshake(hs.clone()).encode(0, &mut buf);
        assert_eq!(buf.len(), 56); // 4 header + 45 fixed + 7 version

        let frame = next_frame(&mut buf).unwrap().unwrap();
        let decoded = Packet::decode(PacketKind::Handshake, frame.payload())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, Packet::Handshake(hs));
    }

    #[test]
    fn handshake_rejects_other_protocol_versions() {
        let mut buf = BytesMut::new();
        let mut hs = HandshakePacket::new();
        hs.protocol_version = 9;
        Packet::Handshake(hs).encode(0, &mut buf);
        let frame = next_frame(&mut buf).unwrap().unwrap();
        assert!(matches!(
            Packet::decode(PacketKind::Handshake, frame.payload()),
            Err(ProtocolError::BadProtocolVersion(9))
        ));
    }

    #[test]
    fn auth_roundtrip_with_and_without_options() {
        let full = AuthPacket {
            username: "root".to_string(),
            scramble: Some([0x42; SCRAMBLE_LEN]),
            database: Some("orders".to_string()),
            ..AuthPacket::default()
        };
        assert_eq!(
            roundtrip(PacketKind::Auth, Packet::Auth(full.clone())),
            Packet::Auth(full)
        );

        let bare = AuthPacket {
            username: "monitor".to_string(),
            ..AuthPacket::default()
        };
        assert_eq!(
            roundtrip(PacketKind::Auth, Packet::Auth(bare.clone())),
            Packet::Auth(bare)
        );
    }

    #[test]
    fn auth_rejects_oversized_username() {
        let auth = AuthPacket {
            username: "a".repeat(MAX_USERNAME_LEN + 1),
            ..AuthPacket::default()
        };
        let mut buf = BytesMut::new();
        Packet::Auth(auth).encode(1, &mut buf);
        let frame = next_frame(&mut buf).unwrap().unwrap();
        assert!(matches!(
            Packet::decode(PacketKind::Auth, frame.payload()),
            Err(ProtocolError::UsernameTooLong(_))
        ));
    }

    #[test]
    fn ok_wire_form() {
        let ok = OkPacket {
            affected_rows: 1,
            ..OkPacket::default()
        };
        let mut buf = BytesMut::new();
        Packet::Ok(ok.clone()).encode(1, &mut buf);
        assert_eq!(buf.len(), 11);
        assert_eq!(&buf[4..], &[0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]);

        assert_eq!(roundtrip(PacketKind::Ok, Packet::Ok(ok.clone())), Packet::Ok(ok));
    }

    #[test]
    fn ok_roundtrip_with_message() {
        let ok = OkPacket {
            affected_rows: 3,
            insert_id: 7,
            warnings: 1,
            message: Some(Bytes::from_static(b"Rows matched: 3")),
            ..OkPacket::default()
        };
        assert_eq!(roundtrip(PacketKind::Ok, Packet::Ok(ok.clone())), Packet::Ok(ok));
    }

    #[test]
    fn err_roundtrip() {
        let err = ErrPacket::access_denied("app@localhost");
        assert_eq!(
            roundtrip(PacketKind::Err, Packet::Err(err.clone())),
            Packet::Err(err)
        );
    }

    #[test]
    fn err_rejects_oversized_message() {
        let err = ErrPacket::new(2013, b"HY000", &"x".repeat(MAX_ERR_MESSAGE_LEN + 1));
        let mut buf = BytesMut::new();
        Packet::Err(err).encode(1, &mut buf);
        let frame = next_frame(&mut buf).unwrap().unwrap();
        assert!(matches!(
            Packet::decode(PacketKind::Err, frame.payload()),
            Err(ProtocolError::ErrMessageTooLong(_))
        ));
    }

    #[test]
    fn command_has_no_wire_terminator() {
        let cmd = CommandPacket::query("select @@version limit 1");
        let mut buf = BytesMut::new();
        Packet::Command(cmd.clone()).encode(0, &mut buf);

        // Opcode plus the bare argument, nothing after it.
        assert_eq!(buf[4], 3);
        assert_eq!(&buf[5..], cmd.argument.as_ref());

        let frame = next_frame(&mut buf).unwrap().unwrap();
        let decoded = Packet::decode(PacketKind::Command, frame.payload())
            .unwrap()
            .unwrap();
        assert_eq!(decoded, Packet::Command(cmd));
    }

    #[test]
    fn result_set_header_roundtrip() {
        for header in [
            ResultSetHeaderPacket {
                field_count: 2,
                extra: None,
            },
            ResultSetHeaderPacket {
                field_count: 300,
                extra: Some(1),
            },
        ] {
            assert_eq!(
                roundtrip(
                    PacketKind::ResultSetHeader,
                    Packet::ResultSetHeader(header.clone())
                ),
                Packet::ResultSetHeader(header)
            );
        }
    }

    #[test]
    fn field_roundtrip() {
        let field = FieldPacket {
            catalog: Bytes::from_static(b"def"),
            db: Bytes::from_static(b"orders"),
            table: Bytes::from_static(b"items"),
            org_table: Bytes::from_static(b"items"),
            name: Bytes::from_static(b"sku"),
            org_name: Bytes::from_static(b"sku"),
            charset: 63,
            length: 32,
            field_type: 0xfd,
            flags: 2,
            decimals: 0,
            default: None,
        };
        assert_eq!(
            roundtrip(PacketKind::Field, Packet::Field(field.clone())),
            Packet::Field(field)
        );
    }

    #[test]
    fn eof_roundtrip() {
        let eof = EofPacket {
            warnings: 1,
            status: 2,
        };
        assert_eq!(
            roundtrip(PacketKind::Eof, Packet::Eof(eof)),
            Packet::Eof(eof)
        );
    }

    #[test]
    fn stats_and_opaque_have_no_record() {
        assert!(Packet::decode(PacketKind::Stats, b"Uptime: 5")
            .unwrap()
            .is_none());
        assert!(Packet::decode(PacketKind::Opaque, b"anything")
            .unwrap()
            .is_none());
    }
}
