//! Command handlers: the semantics behind each FTP verb.
//!
//! Every handler ends with exactly one reply on the control channel (plus
//! the intermediate 150/125 marks around a transfer). Filesystem and
//! data-connection failures are translated to reply codes right here;
//! only control-channel failures propagate out, ending the session.

use crate::command::{FormCode, FtpCommand, ModeCode, StructureCode, TypeCode};
use crate::data_channel::{self, DataChannel};
use crate::errors::FtpResult;
use crate::listing;
use crate::paths;
use crate::session::{FileStructure, FtpSession, TransferType};

use jiff::Timestamp;
use log::{error, info};
use nix::libc::off_t;
use nix::sys::sendfile::sendfile;

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::net::{SocketAddrV4, TcpStream};
use std::os::unix::fs::MetadataExt;
use std::time::Instant;

/// Upper bound on a single sendfile call during IMAGE transfers.
const SENDFILE_CHUNK: u64 = 65536;

/// Read granularity of the ASCII transfer loop; the write buffer is twice
/// this, enough for every byte to be an expanded LF.
const ASCII_CHUNK: usize = 4096;

impl FtpSession {
    pub(crate) fn dispatch(&mut self, command: FtpCommand) -> FtpResult<()> {
        match command {
            FtpCommand::User(name) => self.do_user(&name),
            FtpCommand::Pass(password) => self.do_pass(&password),
            FtpCommand::Cwd(dir) => self.change_dir(&dir),
            FtpCommand::Cdup => self.change_dir(".."),
            FtpCommand::Quit => self.do_quit(),
            FtpCommand::Port(addr) => self.do_port(addr),
            FtpCommand::Pasv => self.do_pasv(),
            FtpCommand::Type(code) => self.do_type(code),
            FtpCommand::Stru(code) => self.do_stru(code),
            FtpCommand::Mode(code) => self.do_mode(code),
            FtpCommand::Retr(path) => self.do_retr(&path),
            FtpCommand::Stor(_) => self.do_stor(),
            FtpCommand::Pwd => self.do_pwd(),
            FtpCommand::List(path) => self.send_listing(path.as_deref(), true),
            FtpCommand::Nlst(path) => self.send_listing(path.as_deref(), false),
            FtpCommand::Syst => self.do_syst(),
            FtpCommand::Noop => self.do_noop(),
            FtpCommand::Rest(offset) => self.do_rest(offset),
            FtpCommand::Mdtm(path) => self.do_mdtm(&path),
            // In the grammar, but nothing behind them.
            FtpCommand::Auth(_) | FtpCommand::Size(_) | FtpCommand::Help(_) => {
                self.reply(502, "Command not implemented.")
            }
        }
    }

    fn do_user(&mut self, name: &str) -> FtpResult<()> {
        if name.eq_ignore_ascii_case("ftp") || name.eq_ignore_ascii_case("anonymous") {
            self.reply(331, "Send e-mail address as password.")
        } else {
            info!(
                "{} attempted to log in as \"{}\"",
                self.client_addr_str, name
            );
            self.reply(530, "Only anonymous FTP supported.")
        }
    }

    fn do_pass(&mut self, password: &str) -> FtpResult<()> {
        info!(
            "{} reports e-mail address \"{}\"",
            self.client_addr_str, password
        );
        self.reply(230, "User logged in, proceed.")
    }

    fn change_dir(&mut self, new_dir: &str) -> FtpResult<()> {
        let target = paths::normalize(&paths::resolve(&self.cwd, new_dir));
        if target.len() > paths::MAX_PATH_LEN {
            return self.reply(550, "Directory change failed; path is too long.");
        }

        match fs::metadata(paths::to_real(&self.root, &target)) {
            Ok(meta) if meta.is_dir() => {
                self.cwd = target;
                self.reply(
                    250,
                    &format!("Directory change to {} successful.", self.cwd),
                )
            }
            Ok(_) => self.reply(550, "Directory change failed; path is not a directory."),
            Err(err) => {
                let text = match err.kind() {
                    io::ErrorKind::PermissionDenied => {
                        "Directory change failed; permission denied."
                    }
                    io::ErrorKind::NotFound => "Directory change failed; path does not exist.",
                    io::ErrorKind::NotADirectory => {
                        "Directory change failed; path is not a directory."
                    }
                    _ => "Directory change failed.",
                };
                self.reply(550, text)
            }
        }
    }

    fn do_pwd(&mut self) -> FtpResult<()> {
        let text = format!("\"{}\" is current directory", self.cwd);
        self.reply(257, &text)
    }

    fn do_quit(&mut self) -> FtpResult<()> {
        self.active = false;
        self.reply(221, "Service closing control connection.")
    }

    fn do_port(&mut self, addr: SocketAddrV4) -> FtpResult<()> {
        if addr.port() < data_channel::MIN_PASV_PORT {
            return self.reply(500, "Port may not be less than 1024, which is reserved.");
        }

        // Replacing the mode drops any passive listener from before.
        self.data_channel = DataChannel::Port(addr);
        self.reply(200, "Command okay.")
    }

    fn do_pasv(&mut self) -> FtpResult<()> {
        let listener = match data_channel::open_passive(*self.server_addr.ip()) {
            Ok(listener) => listener,
            Err(err) => {
                error!(
                    "{} error opening passive listener; {}",
                    self.client_addr_str, err
                );
                return self.reply(425, "Can't open data connection.");
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(err) => {
                error!(
                    "{} error reading passive listener address; {}",
                    self.client_addr_str, err
                );
                return self.reply(425, "Can't open data connection.");
            }
        };

        let ip = self.server_addr.ip().octets();
        self.data_channel = DataChannel::Passive(listener);
        self.reply(
            227,
            &format!(
                "Entering Passive Mode ({},{},{},{},{},{}).",
                ip[0],
                ip[1],
                ip[2],
                ip[3],
                port >> 8,
                port & 0xFF
            ),
        )
    }

    fn do_type(&mut self, code: TypeCode) -> FtpResult<()> {
        match code {
            TypeCode::Ascii(None) | TypeCode::Ascii(Some(FormCode::NonPrint)) => {
                self.data_type = TransferType::Ascii;
                self.reply(200, "Command okay.")
            }
            TypeCode::Image => {
                self.data_type = TransferType::Image;
                self.reply(200, "Command okay.")
            }
            _ => self.reply(504, "Command not implemented for that parameter."),
        }
    }

    fn do_stru(&mut self, code: StructureCode) -> FtpResult<()> {
        match code {
            StructureCode::File => {
                self.file_structure = FileStructure::File;
                self.reply(200, "Command okay.")
            }
            StructureCode::Record => {
                self.file_structure = FileStructure::Record;
                self.reply(200, "Command okay.")
            }
            StructureCode::Page => self.reply(504, "Command not implemented for that parameter."),
        }
    }

    fn do_mode(&mut self, code: ModeCode) -> FtpResult<()> {
        match code {
            ModeCode::Stream => self.reply(200, "Command okay."),
            ModeCode::Block | ModeCode::Compressed => {
                self.reply(504, "Command not implemented for that parameter.")
            }
        }
    }

    fn do_noop(&mut self) -> FtpResult<()> {
        self.reply(200, "Command okay.")
    }

    fn do_syst(&mut self) -> FtpResult<()> {
        self.reply(215, "UNIX.")
    }

    fn do_rest(&mut self, offset: u64) -> FtpResult<()> {
        if self.data_type == TransferType::Image && self.file_structure == FileStructure::File {
            self.file_offset = offset;
            self.file_offset_command_number = self.command_number;
            self.reply(350, "Restart okay, awaiting file retrieval request.")
        } else {
            self.reply(555, "Restart not possible with current TYPE or STRU.")
        }
    }

    fn do_mdtm(&mut self, path: &str) -> FtpResult<()> {
        let target = paths::normalize(&paths::resolve(&self.cwd, path));
        match fs::metadata(paths::to_real(&self.root, &target)) {
            Ok(meta) => {
                let ts = Timestamp::from_second(meta.mtime()).unwrap_or(Timestamp::UNIX_EPOCH);
                self.reply(213, &ts.strftime("%Y%m%d%H%M%S").to_string())
            }
            Err(_) => self.reply(550, "Error getting file status."),
        }
    }

    fn do_stor(&mut self) -> FtpResult<()> {
        self.reply(553, "Server will not store files.")
    }

    /// LIST and NLST: same framing, different formatter.
    fn send_listing(&mut self, path: Option<&str>, long: bool) -> FtpResult<()> {
        let target = match path {
            Some(path) => paths::normalize(&paths::resolve(&self.cwd, path)),
            None => self.cwd.clone(),
        };
        let real = paths::to_real(&self.root, &target);

        self.reply(150, "Opening ASCII mode data connection for file list.")?;
        let Some(stream) = self.open_data_channel()? else {
            return Ok(());
        };
        self.reply(125, "Data connection already open; transfer starting.")?;

        let mut out = BufWriter::new(stream);
        let result = if long {
            listing::write_full_list(&mut out, &real, &target)
        } else {
            listing::write_name_list(&mut out, &real, &target)
        }
        .and_then(|()| out.flush());
        drop(out);

        match result {
            Ok(()) => self.reply(226, "Transfer complete."),
            Err(err) => {
                error!("{} error sending listing; {}", self.client_addr_str, err);
                self.reply(451, "Requested action aborted; local error in processing.")
            }
        }
    }

    fn do_retr(&mut self, path: &str) -> FtpResult<()> {
        let result = self.send_file(path);
        // REST state expires after one retrieval attempt, whatever the
        // outcome.
        self.file_offset = 0;
        result
    }

    fn send_file(&mut self, path: &str) -> FtpResult<()> {
        let target = paths::normalize(&paths::resolve(&self.cwd, path));
        let mut file = match File::open(paths::to_real(&self.root, &target)) {
            Ok(file) => file,
            Err(err) => {
                let text = match err.kind() {
                    io::ErrorKind::PermissionDenied => "Error opening file; permission denied.",
                    io::ErrorKind::NotFound => "Error opening file; file does not exist.",
                    _ => "Error opening file.",
                };
                return self.reply(550, text);
            }
        };

        let mode = match self.data_type {
            TransferType::Ascii => "ASCII",
            TransferType::Image => "BINARY",
        };
        self.reply(150, &format!("Opening {} mode data connection.", mode))?;
        let start = Instant::now();

        let Some(stream) = self.open_data_channel()? else {
            return Ok(());
        };

        let meta = match file.metadata() {
            Ok(meta) => meta,
            Err(_) => return self.reply(550, "Error getting file information."),
        };
        if meta.is_dir() {
            return self.reply(550, "Error, file is a directory.");
        }

        // An accepted REST takes effect only on the immediately following
        // retrieval.
        let mut offset = 0u64;
        if self.file_offset_command_number == self.command_number.wrapping_sub(1)
            && self.file_offset > 0
        {
            offset = self.file_offset;
            if file.seek(SeekFrom::Start(offset)).is_err() {
                return self.reply(550, "Error seeking to restart offset.");
            }
        }

        let outcome = match self.data_type {
            TransferType::Image => transfer_image(&file, &stream, offset, meta.len()),
            TransferType::Ascii => transfer_ascii(&mut file, &stream),
        };
        drop(stream);

        match outcome {
            Ok(bytes) => {
                let elapsed = start.elapsed().as_secs_f64();
                self.reply(226, "Transfer complete.")?;
                info!(
                    "{} retrieved {} ({} bytes in {:.3} seconds)",
                    self.client_addr_str, target, bytes, elapsed
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "{} error sending {}; {}",
                    self.client_addr_str, target, err
                );
                self.reply(550, &format!("Error sending file; {}.", err))
            }
        }
    }
}

/// IMAGE transfer: zero-copy from the file to the socket, bounded chunks,
/// until the offset reaches the size captured at the start. A short send
/// is an error, not a retry.
fn transfer_image(file: &File, stream: &TcpStream, start: u64, size: u64) -> io::Result<u64> {
    let mut offset = start as off_t;
    while (offset as u64) < size {
        let chunk = (size - offset as u64).min(SENDFILE_CHUNK) as usize;
        let sent = sendfile(stream, file, Some(&mut offset), chunk).map_err(io::Error::from)?;
        if sent != chunk {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short send on data connection",
            ));
        }
    }
    Ok(offset as u64 - start)
}

/// ASCII transfer: read in chunks, expand each LF to CRLF, write fully.
/// Returns the byte count put on the wire.
fn transfer_ascii(file: &mut File, mut stream: &TcpStream) -> io::Result<u64> {
    let mut read_buf = [0u8; ASCII_CHUNK];
    let mut write_buf = [0u8; ASCII_CHUNK * 2];
    let mut total = 0u64;

    loop {
        let amount = file.read(&mut read_buf)?;
        if amount == 0 {
            return Ok(total);
        }

        let mut filled = 0;
        for &byte in &read_buf[..amount] {
            if byte == b'\n' {
                write_buf[filled] = b'\r';
                filled += 1;
            }
            write_buf[filled] = byte;
            filled += 1;
        }
        stream.write_all(&write_buf[..filled])?;
        total += filled as u64;
    }
}
