//! # Telnet Protocol Constants
//!
//! The handful of Telnet command bytes (RFC 854, section 4) an FTP control
//! channel has to recognize. The channel never *initiates* negotiation; it
//! only refuses whatever the client proposes, so the full option table of a
//! general Telnet implementation is not needed here.
//!
//! ### IAC (Interpret As Command) - Byte 255
//! The IAC byte signals that the following byte is a Telnet command rather
//! than data. A data byte with value 255 is escaped as IAC IAC (255 255).
//!
//! ### Option negotiation
//! Requests arrive as `IAC WILL/WONT/DO/DONT <option>`. Per RFC 854 a party
//! that does not implement an option must answer `WILL x` with `DONT x` and
//! `DO x` with `WONT x`; `WONT`/`DONT` need no reply.

/// IAC - Interpret As Command (RFC 854, Section 4)
pub const IAC: u8 = 255;

/// WILL - sender wants to enable an option
/// Format: IAC WILL <option>
pub const WILL: u8 = 251;

/// WON'T - sender refuses or disables an option
/// Format: IAC WONT <option>
pub const WONT: u8 = 252;

/// DO - sender asks the receiver to enable an option
/// Format: IAC DO <option>
pub const DO: u8 = 253;

/// DON'T - sender asks the receiver to disable an option
/// Format: IAC DONT <option>
pub const DONT: u8 = 254;

/// Carriage return; CRLF is the logical newline on a Telnet stream.
pub const CR: u8 = 0x0D;

/// Line feed; what a CRLF pair is normalized to for the application.
pub const LF: u8 = 0x0A;

/// Check whether a byte is one of the four option-negotiation commands.
pub fn is_negotiation(byte: u8) -> bool {
    matches!(byte, WILL | WONT | DO | DONT)
}

/// The refusal command paired with a negotiation request: `WILL` is
/// answered with `DONT`, `DO` with `WONT`. `WONT`/`DONT` are absorbed
/// without a reply.
pub fn refusal(command: u8) -> Option<u8> {
    match command {
        WILL => Some(DONT),
        DO => Some(WONT),
        _ => None,
    }
}
