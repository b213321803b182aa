//! MySQL 4.1+ wire protocol: byte primitives, packet framing, typed packet
//! records and the per-connection protocol state machine.

pub mod frame;
pub mod machine;
pub mod packet;
pub mod wire;
