//! Per-connection FTP session: transfer parameters, reply framing, and the
//! command loop.
//!
//! A session owns its control channel and runs commands strictly in
//! receive order; each reply is on the wire before the next line is read,
//! and any data-channel activity for a command finishes (final reply sent)
//! before the next command is parsed. All state here is touched only by
//! the connection's own worker thread.

use crate::command::{FtpCommand, ParseError};
use crate::data_channel::DataChannel;
use crate::errors::FtpResult;
use crate::paths;

use log::{debug, info};
use telnet_channel::{BUF_LEN, ChannelError, TelnetChannel};

use std::fs;
use std::net::SocketAddrV4;
use std::path::PathBuf;

/// Longest accepted command line, bounded by the channel's buffering.
pub const MAX_COMMAND_LINE: usize = BUF_LEN;

/// Banner file sent as a multi-line prefix to the 220 greeting.
pub const README_FILE_NAME: &str = ".message";

/// Sentinel for "no REST accepted": never equal to `command_number - 1`.
pub(crate) const OFFSET_COMMAND_UNSET: u64 = u64::MAX;

/// TYPE in effect for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    /// LF expanded to CRLF in transit.
    Ascii,
    /// Bytes copied verbatim.
    Image,
}

/// STRU in effect. RECORD is accepted but transfers identically to FILE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStructure {
    File,
    Record,
}

/// State for one control connection.
pub struct FtpSession {
    pub(crate) channel: TelnetChannel,

    /// Real directory the virtual tree maps onto ("/" once chrooted).
    pub(crate) root: PathBuf,

    /// Cleared by QUIT; ends the command loop.
    pub(crate) active: bool,

    /// Increments per accepted line, wrapping at the maximum; REST uses it
    /// to tell whether it immediately precedes the RETR.
    pub(crate) command_number: u64,

    pub(crate) data_type: TransferType,
    pub(crate) file_structure: FileStructure,

    /// Restart offset from an accepted REST, and the command number that
    /// accepted it.
    pub(crate) file_offset: u64,
    pub(crate) file_offset_command_number: u64,

    pub(crate) client_addr: SocketAddrV4,
    pub(crate) client_addr_str: String,
    pub(crate) server_addr: SocketAddrV4,

    /// Virtual working directory, absolute and normalized.
    pub(crate) cwd: String,

    /// Data-connection mode; starts as active mode toward the client's
    /// control address, the RFC 959 default data port.
    pub(crate) data_channel: DataChannel,
}

impl FtpSession {
    pub fn new(
        channel: TelnetChannel,
        client_addr: SocketAddrV4,
        server_addr: SocketAddrV4,
        root: PathBuf,
    ) -> Self {
        Self {
            channel,
            root,
            active: true,
            command_number: 0,
            data_type: TransferType::Ascii,
            file_structure: FileStructure::File,
            file_offset: 0,
            file_offset_command_number: OFFSET_COMMAND_UNSET,
            client_addr,
            client_addr_str: format!("{} port {}", client_addr.ip(), client_addr.port()),
            server_addr,
            cwd: "/".to_string(),
            data_channel: DataChannel::Port(client_addr),
        }
    }

    /// Send one `<code> <text>` reply line.
    pub(crate) fn reply(&mut self, code: u16, text: &str) -> FtpResult<()> {
        debug_assert!((100..=559).contains(&code));

        debug!("{} <-- {} {}", self.client_addr_str, code, text);
        self.channel.print_line(&format!("{} {}", code, text))?;
        Ok(())
    }

    /// Refuse or end the session with a 421 farewell.
    pub(crate) fn drop_session(&mut self, reason: &str) -> FtpResult<()> {
        self.reply(421, &format!("{}.", reason))
    }

    /// Greet, then read, parse, and dispatch commands until QUIT, EOF, a
    /// sticky channel failure, or the inactivity deadline.
    pub fn run(&mut self) -> FtpResult<()> {
        self.send_banner(220)?;
        self.reply(220, "Service ready for new user.")?;

        while self.active {
            let line = match self.channel.read_line(MAX_COMMAND_LINE) {
                Ok(line) => line,
                Err(ChannelError::TimedOut) => {
                    info!(
                        "{} inactivity timeout, dropping connection",
                        self.client_addr_str
                    );
                    let _ = self.drop_session("Inactivity timeout");
                    break;
                }
                Err(_) => break,
            };

            self.command_number = self.command_number.wrapping_add(1);

            // A line without its newline hit the buffer limit; eat the
            // rest of it before answering anything else.
            if !line.ends_with('\n') {
                self.reply(500, "Command line too long.")?;
                loop {
                    match self.channel.read_line(MAX_COMMAND_LINE) {
                        Ok(fragment) if fragment.ends_with('\n') => break,
                        Ok(_) => continue,
                        Err(_) => return Ok(()),
                    }
                }
                continue;
            }

            let command = match FtpCommand::parse(&line) {
                Ok(command) => command,
                Err(ParseError::Parameters) => {
                    self.reply(
                        501,
                        &format!(
                            "Syntax error in parameters or arguments of command {}.",
                            line.trim_end()
                        ),
                    )?;
                    continue;
                }
                Err(ParseError::Unrecognized) => {
                    self.reply(
                        500,
                        &format!("Syntax error, command {} unrecognized.", line.trim_end()),
                    )?;
                    continue;
                }
            };

            info!("{} --> {}", self.client_addr_str, command.verb());
            self.dispatch(command)?;
        }

        Ok(())
    }

    /// Send the optional README banner as `<code>-` continuation lines.
    /// Absence or unreadability of the file is not an error.
    fn send_banner(&mut self, code: u16) -> FtpResult<()> {
        let target = paths::normalize(&paths::resolve(&self.cwd, README_FILE_NAME));
        let real = paths::to_real(&self.root, &target);

        let Ok(meta) = fs::metadata(&real) else {
            return Ok(());
        };
        if !meta.is_file() {
            return Ok(());
        }
        let Ok(contents) = fs::read(&real) else {
            return Ok(());
        };

        for line in String::from_utf8_lossy(&contents).lines() {
            self.channel.print_line(&format!("{}-{}", code, line))?;
        }
        Ok(())
    }
}
