//! # TelnetChannel - line-oriented control connection wrapper
//!
//! `TelnetChannel` wraps the control-connection `TcpStream` and turns the
//! raw Telnet byte stream into CRLF-framed text lines:
//!
//! - Option negotiation is filtered out of the input and refused on the
//!   output (`IAC WILL x` answered with `IAC DONT x`, `IAC DO x` with
//!   `IAC WONT x`), so the FTP layer never sees an IAC except for an
//!   escaped `IAC IAC` data byte.
//! - CR followed by anything other than LF (including the CR-NUL form some
//!   clients send) is normalized to LF plus that byte; CRLF becomes LF.
//! - Writes go out with CRLF line endings via [`print_line`].
//!
//! Both directions run through fixed [`RingBuffer`]s and a single `select`
//! based I/O pump, so a blocked peer cannot wedge reads against writes. The
//! first I/O failure on either direction is captured into a sticky state;
//! every later operation on that direction fails immediately without
//! touching the socket again.
//!
//! [`print_line`]: TelnetChannel::print_line

use crate::protocol::{CR, DO, DONT, IAC, LF, WILL, WONT};
use crate::ring::{BUF_LEN, RingBuffer};

use nix::errno::Errno;
use nix::sys::select::{FdSet, select};
use nix::sys::time::{TimeVal, TimeValLike};

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsFd;
use std::time::Duration;

/// Input filter state (RFC 854 command sequences plus CRLF tracking).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    Normal,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Cr,
}

/// Why a channel operation could not complete. Once reported, the same
/// error is returned by every subsequent call for that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer closed the connection.
    Closed,
    /// The inactivity deadline expired while waiting for the peer.
    TimedOut,
    /// First I/O failure captured on the descriptor (raw errno).
    Io(i32),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "connection closed by peer"),
            ChannelError::TimedOut => write!(f, "connection timed out"),
            ChannelError::Io(errno) => {
                write!(f, "I/O error: {}", io::Error::from_raw_os_error(*errno))
            }
        }
    }
}

impl std::error::Error for ChannelError {}

/// Result type alias for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// A Telnet-filtering, line-oriented channel over one `TcpStream`.
pub struct TelnetChannel {
    stream: TcpStream,

    /// Optional inactivity deadline applied to blocking waits.
    timeout: Option<Duration>,

    incoming: RingBuffer,
    outgoing: RingBuffer,
    state: InputState,

    // Sticky condition flags; set once, never cleared.
    in_errno: Option<i32>,
    in_eof: bool,
    out_errno: Option<i32>,
    out_eof: bool,
    timed_out: bool,
}

impl TelnetChannel {
    /// Wrap an accepted control connection. An initial non-blocking pump
    /// picks up any negotiation the client sent immediately on connect.
    pub fn new(stream: TcpStream, timeout: Option<Duration>) -> Self {
        let mut channel = Self {
            stream,
            timeout,
            incoming: RingBuffer::new(),
            outgoing: RingBuffer::new(),
            state: InputState::Normal,
            in_errno: None,
            in_eof: false,
            out_errno: None,
            out_eof: false,
            timed_out: false,
        };
        channel.pump(false);
        channel
    }

    /// Read one line of at most `max - 1` bytes, blocking as needed.
    ///
    /// The returned string normally ends with `\n`; a string returned
    /// *without* a trailing `\n` means the limit was reached first and the
    /// rest of the line is still in flight (the caller drains it).
    ///
    /// Fails only on the sticky error, EOF, or timeout states.
    pub fn read_line(&mut self, max: usize) -> ChannelResult<String> {
        assert!(max >= 2);

        let mut line: Vec<u8> = Vec::new();
        loop {
            self.check_input_open()?;

            while !self.incoming.is_empty() {
                if line.len() == max - 1 {
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                // Guarded by the loop condition.
                let byte = self.incoming.pop().unwrap();
                line.push(byte);
                if byte == LF {
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
            }

            self.pump(true);
        }
    }

    /// Queue `text` on the outgoing buffer and pump until it is on the wire.
    pub fn print(&mut self, text: &str) -> ChannelResult<()> {
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return Ok(());
        }

        let mut sent = 0;
        loop {
            self.check_output_open()?;
            while sent < bytes.len() && self.outgoing.free() > 0 {
                self.outgoing.push(bytes[sent]);
                sent += 1;
            }
            self.pump(true);
            if sent == bytes.len() {
                break;
            }
        }

        // Drain fully so a reply is on the wire before the next command is
        // read.
        while !self.outgoing.is_empty() {
            self.check_output_open()?;
            self.pump(true);
        }
        Ok(())
    }

    /// [`print`] followed by the CRLF that terminates a Telnet line.
    ///
    /// [`print`]: TelnetChannel::print
    pub fn print_line(&mut self, text: &str) -> ChannelResult<()> {
        self.print(text)?;
        self.print("\r\n")
    }

    /// Whether the session died waiting out the inactivity deadline.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    fn check_input_open(&self) -> ChannelResult<()> {
        if self.timed_out {
            Err(ChannelError::TimedOut)
        } else if let Some(errno) = self.in_errno {
            Err(ChannelError::Io(errno))
        } else if self.in_eof {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_output_open(&self) -> ChannelResult<()> {
        if let Some(errno) = self.out_errno {
            Err(ChannelError::Io(errno))
        } else if self.out_eof {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    /// How much may be read in one go: limited by free input-buffer space
    /// and by free *output* space, which is reserved for the DONT/WONT
    /// replies input processing may generate.
    fn max_input_read(&self) -> usize {
        self.incoming.free().min(self.outgoing.free())
    }

    /// Receive any incoming data and send any pending data.
    ///
    /// With `wait` set, blocks until the socket is ready in some armed
    /// direction or the inactivity deadline passes; expiry flags the
    /// direction(s) that were being waited on. Without `wait` this is a
    /// poll.
    fn pump(&mut self, wait: bool) {
        let want_read = self.in_errno.is_none() && !self.in_eof && self.max_input_read() > 0;
        let want_write = self.out_errno.is_none() && !self.out_eof && !self.outgoing.is_empty();
        if !want_read && !want_write {
            return;
        }

        let (readable, writable, expired) = {
            let fd = self.stream.as_fd();
            let mut read_fds = FdSet::new();
            let mut write_fds = FdSet::new();
            if want_read {
                read_fds.insert(fd);
            }
            if want_write {
                write_fds.insert(fd);
            }

            let mut poll_tv = TimeVal::microseconds(0);
            let mut deadline_tv = self
                .timeout
                .map(|t| TimeVal::microseconds(t.as_micros() as i64));
            let timeval = if wait {
                deadline_tv.as_mut()
            } else {
                Some(&mut poll_tv)
            };

            match select(
                None::<i32>,
                &mut read_fds,
                &mut write_fds,
                None::<&mut FdSet>,
                timeval,
            ) {
                Ok(0) => (false, false, wait),
                Ok(_) => (read_fds.contains(fd), write_fds.contains(fd), false),
                // EINTR and friends: nothing became ready, try again later.
                Err(_) => (false, false, false),
            }
        };

        if expired {
            if want_read {
                self.timed_out = true;
            }
            if want_write {
                self.out_errno = Some(Errno::ETIMEDOUT as i32);
            }
            return;
        }

        if readable {
            self.read_input();
        }
        if writable {
            self.write_output();
        }
    }

    /// Read as much as buffer space allows and run it through the filter.
    fn read_input(&mut self) {
        let max = self.max_input_read();
        let mut buf = [0u8; BUF_LEN];
        match self.stream.read(&mut buf[..max]) {
            Ok(0) => self.in_eof = true,
            Ok(amount) => {
                for &byte in &buf[..amount] {
                    self.process_input_byte(byte);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => self.in_errno = Some(err.raw_os_error().unwrap_or(0)),
        }
    }

    /// Write one contiguous region of the outgoing ring.
    fn write_output(&mut self) {
        let result = {
            let region = self.outgoing.contiguous();
            self.stream.write(region)
        };
        match result {
            Ok(0) => self.out_eof = true,
            Ok(amount) => self.outgoing.consume(amount),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => self.out_errno = Some(err.raw_os_error().unwrap_or(0)),
        }
    }

    /// Advance the input state machine by one byte.
    fn process_input_byte(&mut self, byte: u8) {
        match self.state {
            InputState::Normal => {
                if byte == IAC {
                    self.state = InputState::Iac;
                } else if byte == CR {
                    self.state = InputState::Cr;
                } else {
                    self.incoming.push(byte);
                }
            }
            InputState::Iac => {
                self.state = match byte {
                    WILL => InputState::Will,
                    WONT => InputState::Wont,
                    DO => InputState::Do,
                    DONT => InputState::Dont,
                    IAC => {
                        // Escaped data byte 255.
                        self.incoming.push(IAC);
                        InputState::Normal
                    }
                    _ => InputState::Normal,
                };
            }
            InputState::Will => {
                self.outgoing.push(IAC);
                self.outgoing.push(DONT);
                self.outgoing.push(byte);
                self.state = InputState::Normal;
            }
            InputState::Do => {
                self.outgoing.push(IAC);
                self.outgoing.push(WONT);
                self.outgoing.push(byte);
                self.state = InputState::Normal;
            }
            InputState::Wont | InputState::Dont => {
                self.state = InputState::Normal;
            }
            InputState::Cr => {
                self.incoming.push(LF);
                if byte != LF {
                    self.incoming.push(byte);
                }
                self.state = InputState::Normal;
            }
        }
    }
}

impl fmt::Debug for TelnetChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelnetChannel")
            .field("state", &self.state)
            .field("in_eof", &self.in_eof)
            .field("out_eof", &self.out_eof)
            .field("timed_out", &self.timed_out)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    /// A connected (client, server-side channel) pair over loopback.
    fn channel_pair(timeout: Option<Duration>) -> (TcpStream, TelnetChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, TelnetChannel::new(server, timeout))
    }

    #[test]
    fn test_plain_line() {
        let (mut client, mut channel) = channel_pair(None);
        client.write_all(b"USER ftp\r\n").unwrap();

        let line = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(line, "USER ftp\n");
    }

    #[test]
    fn test_negotiation_is_refused_and_stripped() {
        let (mut client, mut channel) = channel_pair(None);
        // IAC WILL 0x01, then a command line.
        client.write_all(&[IAC, WILL, 0x01]).unwrap();
        client.write_all(b"NOOP\r\n").unwrap();

        let line = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(line, "NOOP\n");

        // The queued refusal goes out ahead of the next reply: IAC DONT
        // 0x01, then the text.
        channel.print_line("200 Command okay.").unwrap();
        let mut refusal = [0u8; 3];
        client.read_exact(&mut refusal).unwrap();
        assert_eq!(refusal, [IAC, DONT, 0x01]);

        let mut reply = [0u8; 19];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply[..], b"200 Command okay.\r\n");
    }

    #[test]
    fn test_do_refused_with_wont() {
        let (mut client, mut channel) = channel_pair(None);
        client.write_all(&[IAC, DO, 0x18]).unwrap();
        client.write_all(b"X\r\n").unwrap();

        channel.read_line(BUF_LEN).unwrap();
        channel.print_line("200").unwrap();

        let mut refusal = [0u8; 3];
        client.read_exact(&mut refusal).unwrap();
        assert_eq!(refusal, [IAC, WONT, 0x18]);
    }

    #[test]
    fn test_escaped_iac_reaches_application() {
        let (mut client, mut channel) = channel_pair(None);
        client.write_all(&[b'A', IAC, IAC, b'B', CR, LF]).unwrap();

        // 0xFF alone is not valid UTF-8; the lossy conversion shows the
        // replacement character, but the surrounding bytes survive.
        let line = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(line, "A\u{FFFD}B\n");
    }

    #[test]
    fn test_cr_nul_normalized_to_lf() {
        let (mut client, mut channel) = channel_pair(None);
        // Telnet's CR NUL form of a bare carriage return.
        client.write_all(b"AB\r\0CD\r\n").unwrap();

        let line = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(line, "AB\n");
        let line = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(line.as_bytes(), b"\0CD\n");
    }

    #[test]
    fn test_line_limit_returns_without_newline() {
        let (mut client, mut channel) = channel_pair(None);
        client.write_all(b"ABCDEFGH\r\n").unwrap();

        let line = channel.read_line(5).unwrap();
        assert_eq!(line, "ABCD");
        let rest = channel.read_line(BUF_LEN).unwrap();
        assert_eq!(rest, "EFGH\n");
    }

    #[test]
    fn test_print_line_appends_crlf() {
        let (mut client, mut channel) = channel_pair(None);
        channel.print_line("220 Service ready for new user.").unwrap();

        let mut buf = [0u8; 64];
        let amount = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..amount], b"220 Service ready for new user.\r\n");
    }

    #[test]
    fn test_eof_is_sticky() {
        let (client, mut channel) = channel_pair(None);
        drop(client);

        assert_eq!(channel.read_line(BUF_LEN), Err(ChannelError::Closed));
        assert_eq!(channel.read_line(BUF_LEN), Err(ChannelError::Closed));
    }

    #[test]
    fn test_eof_after_partial_line() {
        let (mut client, mut channel) = channel_pair(None);
        client.write_all(b"QUI").unwrap();
        drop(client);

        assert_eq!(channel.read_line(BUF_LEN), Err(ChannelError::Closed));
    }

    #[test]
    fn test_inactivity_timeout() {
        let (_client, mut channel) = channel_pair(Some(Duration::from_millis(50)));

        assert_eq!(channel.read_line(BUF_LEN), Err(ChannelError::TimedOut));
        assert!(channel.timed_out());
        // Output stays usable for the farewell reply.
        assert!(channel.print_line("421 Inactivity timeout.").is_ok());
    }
}
