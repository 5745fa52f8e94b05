//! # Telnet Line Channel
//!
//! A small library implementing the Telnet-aware line channel an FTP server
//! runs its control connection through, as defined in:
//! - RFC 854: Telnet Protocol Specification (https://tools.ietf.org/html/rfc854)
//! - RFC 959, section 5.3: FTP commands travel over a Telnet stream as
//!   CRLF-terminated lines
//!
//! An FTP control connection is, by specification, a Telnet stream. Clients
//! may open it with option negotiation (`IAC WILL/WONT/DO/DONT <opt>`), and
//! logical newlines arrive as CRLF. This crate filters the negotiation out
//! (refusing every offered option), normalizes CRLF to LF, and presents the
//! result as plain text lines.
//!
//! ## Architecture Overview
//!
//! The library is organized into three modules:
//! - `protocol`: Telnet command bytes and classification helpers (RFC 854)
//! - `ring`: the fixed-capacity byte queues backing each direction
//! - `channel`: `TelnetChannel`, the line-oriented wrapper over the
//!   control-connection `TcpStream`

pub mod channel;
pub mod protocol;
pub mod ring;

pub use channel::{ChannelError, ChannelResult, TelnetChannel};
pub use ring::{BUF_LEN, RingBuffer};
