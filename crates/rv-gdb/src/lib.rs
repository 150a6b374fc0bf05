//! GDB remote serial protocol stub: one listener per VM, packet framing,
//! and command dispatch against a [`GdbTarget`] collaborator.

pub mod commands;
pub mod packet;
pub mod server;
pub mod target;

pub use commands::{decode_hex, encode_hex, handle};
pub use packet::{encode_packet, read_event, GdbError, PacketEvent};
pub use server::GdbServer;
pub use target::{BreakpointKind, GdbTarget, MockTarget};
