//! FTP command grammar (RFC 959, section 5.3).
//!
//! A raw command line from the control channel is parsed into a typed
//! [`FtpCommand`]. Verbs are matched case-insensitively against an ordered
//! table, first match wins; each verb then parses its own argument form.
//! The line must end with the LF the Telnet layer produced from the
//! client's CRLF, with nothing left over, or parsing fails.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Longest accepted string argument (paths, user names), in bytes.
pub const MAX_STRING_LEN: usize = 4096;

/// Why a line failed to parse: either no verb matched, or the verb's
/// argument form did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Unrecognized,
    Parameters,
}

/// Second character of a TYPE argument (`A N`, `E C`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormCode {
    NonPrint,
    Telnet,
    CarriageControl,
}

impl FormCode {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte.to_ascii_uppercase() {
            b'N' => Some(FormCode::NonPrint),
            b'T' => Some(FormCode::Telnet),
            b'C' => Some(FormCode::CarriageControl),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            FormCode::NonPrint => 'N',
            FormCode::Telnet => 'T',
            FormCode::CarriageControl => 'C',
        }
    }
}

/// TYPE argument as parsed; which of these the server actually honors is
/// the handler's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    Ascii(Option<FormCode>),
    Ebcdic(Option<FormCode>),
    Image,
    Local(u8),
}

/// STRU argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureCode {
    File,
    Record,
    Page,
}

/// MODE argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeCode {
    Stream,
    Block,
    Compressed,
}

/// One parsed FTP command. Immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    Auth(String),
    User(String),
    Pass(String),
    Cwd(String),
    Cdup,
    Quit,
    Port(SocketAddrV4),
    Pasv,
    Type(TypeCode),
    Stru(StructureCode),
    Mode(ModeCode),
    Retr(String),
    Stor(String),
    Pwd,
    List(Option<String>),
    Nlst(Option<String>),
    Syst,
    Help(Option<String>),
    Noop,
    Rest(u64),
    Size(String),
    Mdtm(String),
}

/// Argument form a verb takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    None,
    String,
    OptionalString,
    HostPort,
    Type,
    Structure,
    Mode,
    Offset,
}

/// Recognized verbs, in match order. First prefix match wins.
const COMMAND_TABLE: &[(&str, ArgKind)] = &[
    ("AUTH", ArgKind::String),
    ("USER", ArgKind::String),
    ("PASS", ArgKind::String),
    ("CWD", ArgKind::String),
    ("CDUP", ArgKind::None),
    ("QUIT", ArgKind::None),
    ("PORT", ArgKind::HostPort),
    ("PASV", ArgKind::None),
    ("TYPE", ArgKind::Type),
    ("STRU", ArgKind::Structure),
    ("MODE", ArgKind::Mode),
    ("RETR", ArgKind::String),
    ("STOR", ArgKind::String),
    ("PWD", ArgKind::None),
    ("LIST", ArgKind::OptionalString),
    ("NLST", ArgKind::OptionalString),
    ("SYST", ArgKind::None),
    ("HELP", ArgKind::OptionalString),
    ("NOOP", ArgKind::None),
    ("REST", ArgKind::Offset),
    ("SIZE", ArgKind::String),
    ("MDTM", ArgKind::String),
];

impl FtpCommand {
    /// Parse one LF-terminated command line.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (verb, kind) = COMMAND_TABLE
            .iter()
            .find(|(name, _)| {
                line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name)
            })
            .copied()
            .ok_or(ParseError::Unrecognized)?;

        let rest = &line[verb.len()..];
        let (command, rest) = match kind {
            ArgKind::None => (Self::without_arg(verb), rest),
            ArgKind::String => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (arg, rest) = copy_line(rest);
                (Self::with_string(verb, arg), rest)
            }
            ArgKind::OptionalString => match rest.strip_prefix(' ') {
                Some(rest) => {
                    let (arg, rest) = copy_line(rest);
                    (Self::with_optional_string(verb, Some(arg)), rest)
                }
                None => (Self::with_optional_string(verb, None), rest),
            },
            ArgKind::HostPort => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (addr, rest) = parse_host_port(rest).ok_or(ParseError::Parameters)?;
                (FtpCommand::Port(addr), rest)
            }
            ArgKind::Type => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (code, rest) = parse_type(rest).ok_or(ParseError::Parameters)?;
                (FtpCommand::Type(code), rest)
            }
            ArgKind::Structure => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (code, rest) = parse_structure(rest).ok_or(ParseError::Parameters)?;
                (FtpCommand::Stru(code), rest)
            }
            ArgKind::Mode => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (code, rest) = parse_mode(rest).ok_or(ParseError::Parameters)?;
                (FtpCommand::Mode(code), rest)
            }
            ArgKind::Offset => {
                let rest = rest.strip_prefix(' ').ok_or(ParseError::Parameters)?;
                let (offset, rest) = parse_offset(rest).ok_or(ParseError::Parameters)?;
                (FtpCommand::Rest(offset), rest)
            }
        };

        // Nothing may remain but the terminating newline.
        if rest.starts_with('\n') {
            Ok(command)
        } else {
            Err(ParseError::Parameters)
        }
    }

    /// The verb as it appears in the command table.
    pub fn verb(&self) -> &'static str {
        match self {
            FtpCommand::Auth(_) => "AUTH",
            FtpCommand::User(_) => "USER",
            FtpCommand::Pass(_) => "PASS",
            FtpCommand::Cwd(_) => "CWD",
            FtpCommand::Cdup => "CDUP",
            FtpCommand::Quit => "QUIT",
            FtpCommand::Port(_) => "PORT",
            FtpCommand::Pasv => "PASV",
            FtpCommand::Type(_) => "TYPE",
            FtpCommand::Stru(_) => "STRU",
            FtpCommand::Mode(_) => "MODE",
            FtpCommand::Retr(_) => "RETR",
            FtpCommand::Stor(_) => "STOR",
            FtpCommand::Pwd => "PWD",
            FtpCommand::List(_) => "LIST",
            FtpCommand::Nlst(_) => "NLST",
            FtpCommand::Syst => "SYST",
            FtpCommand::Help(_) => "HELP",
            FtpCommand::Noop => "NOOP",
            FtpCommand::Rest(_) => "REST",
            FtpCommand::Size(_) => "SIZE",
            FtpCommand::Mdtm(_) => "MDTM",
        }
    }

    fn without_arg(verb: &str) -> Self {
        match verb {
            "CDUP" => FtpCommand::Cdup,
            "QUIT" => FtpCommand::Quit,
            "PASV" => FtpCommand::Pasv,
            "PWD" => FtpCommand::Pwd,
            "SYST" => FtpCommand::Syst,
            "NOOP" => FtpCommand::Noop,
            _ => unreachable!("verb {} has no argument-free form", verb),
        }
    }

    fn with_string(verb: &str, arg: String) -> Self {
        match verb {
            "AUTH" => FtpCommand::Auth(arg),
            "USER" => FtpCommand::User(arg),
            "PASS" => FtpCommand::Pass(arg),
            "CWD" => FtpCommand::Cwd(arg),
            "RETR" => FtpCommand::Retr(arg),
            "STOR" => FtpCommand::Stor(arg),
            "SIZE" => FtpCommand::Size(arg),
            "MDTM" => FtpCommand::Mdtm(arg),
            _ => unreachable!("verb {} takes no string argument", verb),
        }
    }

    fn with_optional_string(verb: &str, arg: Option<String>) -> Self {
        match verb {
            "LIST" => FtpCommand::List(arg),
            "NLST" => FtpCommand::Nlst(arg),
            "HELP" => FtpCommand::Help(arg),
            _ => unreachable!("verb {} takes no optional string", verb),
        }
    }
}

impl fmt::Display for FtpCommand {
    /// The canonical textual form; parsing it back yields an equal command.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpCommand::Auth(arg)
            | FtpCommand::User(arg)
            | FtpCommand::Pass(arg)
            | FtpCommand::Cwd(arg)
            | FtpCommand::Retr(arg)
            | FtpCommand::Stor(arg)
            | FtpCommand::Size(arg)
            | FtpCommand::Mdtm(arg) => write!(f, "{} {}", self.verb(), arg),
            FtpCommand::Cdup
            | FtpCommand::Quit
            | FtpCommand::Pasv
            | FtpCommand::Pwd
            | FtpCommand::Syst
            | FtpCommand::Noop => write!(f, "{}", self.verb()),
            FtpCommand::List(arg) | FtpCommand::Nlst(arg) | FtpCommand::Help(arg) => {
                match arg {
                    Some(arg) => write!(f, "{} {}", self.verb(), arg),
                    None => write!(f, "{}", self.verb()),
                }
            }
            FtpCommand::Port(addr) => {
                let ip = addr.ip().octets();
                write!(
                    f,
                    "PORT {},{},{},{},{},{}",
                    ip[0],
                    ip[1],
                    ip[2],
                    ip[3],
                    addr.port() >> 8,
                    addr.port() & 0xFF
                )
            }
            FtpCommand::Type(code) => match code {
                TypeCode::Ascii(None) => write!(f, "TYPE A"),
                TypeCode::Ascii(Some(form)) => write!(f, "TYPE A {}", form.letter()),
                TypeCode::Ebcdic(None) => write!(f, "TYPE E"),
                TypeCode::Ebcdic(Some(form)) => write!(f, "TYPE E {}", form.letter()),
                TypeCode::Image => write!(f, "TYPE I"),
                TypeCode::Local(bits) => write!(f, "TYPE L {}", bits),
            },
            FtpCommand::Stru(code) => match code {
                StructureCode::File => write!(f, "STRU F"),
                StructureCode::Record => write!(f, "STRU R"),
                StructureCode::Page => write!(f, "STRU P"),
            },
            FtpCommand::Mode(code) => match code {
                ModeCode::Stream => write!(f, "MODE S"),
                ModeCode::Block => write!(f, "MODE B"),
                ModeCode::Compressed => write!(f, "MODE C"),
            },
            FtpCommand::Rest(offset) => write!(f, "REST {}", offset),
        }
    }
}

/// Copy a string argument up to the newline (or the length cap; the
/// leftover then fails the end-of-line check).
fn copy_line(s: &str) -> (String, &str) {
    let end = s
        .find(['\n', '\0'])
        .unwrap_or(s.len())
        .min(MAX_STRING_LEN);
    (s[..end].to_string(), &s[end..])
}

/// Scan a decimal number in `0..=max`. Overflow is caught before it can
/// happen: with another digit pending, `current * 10` must stay within
/// `max - digit`.
fn parse_number(s: &str, max: u32) -> Option<(u32, &str)> {
    let bytes = s.as_bytes();
    if bytes.first().is_none_or(|b| !b.is_ascii_digit()) {
        return None;
    }

    let mut value: u32 = (bytes[0] - b'0') as u32;
    let mut used = 1;
    while let Some(byte) = bytes.get(used).filter(|b| b.is_ascii_digit()) {
        let digit = (byte - b'0') as u32;
        if value > (max - digit) / 10 {
            return None;
        }
        value = value * 10 + digit;
        used += 1;
    }

    if value > max {
        return None;
    }
    Some((value, &s[used..]))
}

/// Scan a byte offset, bounded by the host's file-offset width.
fn parse_offset(s: &str) -> Option<(u64, &str)> {
    const MAX_OFFSET: u64 = i64::MAX as u64;

    let bytes = s.as_bytes();
    if bytes.first().is_none_or(|b| !b.is_ascii_digit()) {
        return None;
    }

    let mut value: u64 = (bytes[0] - b'0') as u64;
    let mut used = 1;
    while let Some(byte) = bytes.get(used).filter(|b| b.is_ascii_digit()) {
        let digit = (byte - b'0') as u64;
        if value > (MAX_OFFSET - digit) / 10 {
            return None;
        }
        value = value * 10 + digit;
        used += 1;
    }

    Some((value, &s[used..]))
}

/// Scan the RFC 959 `h1,h2,h3,h4,p1,p2` host-port form.
fn parse_host_port(s: &str) -> Option<(SocketAddrV4, &str)> {
    let mut octets = [0u32; 6];
    let mut rest = s;

    for (index, octet) in octets.iter_mut().enumerate() {
        if index > 0 {
            rest = rest.strip_prefix(',')?;
        }
        let (value, after) = parse_number(rest, 255)?;
        *octet = value;
        rest = after;
    }

    let ip = Ipv4Addr::new(
        octets[0] as u8,
        octets[1] as u8,
        octets[2] as u8,
        octets[3] as u8,
    );
    let port = ((octets[4] as u16) << 8) | octets[5] as u16;
    Some((SocketAddrV4::new(ip, port), rest))
}

fn parse_type(s: &str) -> Option<(TypeCode, &str)> {
    let first = s.as_bytes().first()?.to_ascii_uppercase();
    let rest = &s[1..];

    match first {
        b'A' | b'E' => {
            let (form, rest) = match rest.strip_prefix(' ') {
                Some(after) => {
                    let form = FormCode::from_byte(*after.as_bytes().first()?)?;
                    (Some(form), &after[1..])
                }
                None => (None, rest),
            };
            let code = if first == b'A' {
                TypeCode::Ascii(form)
            } else {
                TypeCode::Ebcdic(form)
            };
            Some((code, rest))
        }
        b'I' => Some((TypeCode::Image, rest)),
        b'L' => {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            let (bits, rest) = parse_number(rest, 255)?;
            Some((TypeCode::Local(bits as u8), rest))
        }
        _ => None,
    }
}

fn parse_structure(s: &str) -> Option<(StructureCode, &str)> {
    let code = match s.as_bytes().first()?.to_ascii_uppercase() {
        b'F' => StructureCode::File,
        b'R' => StructureCode::Record,
        b'P' => StructureCode::Page,
        _ => return None,
    };
    Some((code, &s[1..]))
}

fn parse_mode(s: &str) -> Option<(ModeCode, &str)> {
    let code = match s.as_bytes().first()?.to_ascii_uppercase() {
        b'S' => ModeCode::Stream,
        b'B' => ModeCode::Block,
        b'C' => ModeCode::Compressed,
        _ => return None,
    };
    Some((code, &s[1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<FtpCommand, ParseError> {
        FtpCommand::parse(line)
    }

    #[test]
    fn test_bare_verbs() {
        assert_eq!(parse("QUIT\n"), Ok(FtpCommand::Quit));
        assert_eq!(parse("CDUP\n"), Ok(FtpCommand::Cdup));
        assert_eq!(parse("PASV\n"), Ok(FtpCommand::Pasv));
        assert_eq!(parse("PWD\n"), Ok(FtpCommand::Pwd));
        assert_eq!(parse("SYST\n"), Ok(FtpCommand::Syst));
        assert_eq!(parse("NOOP\n"), Ok(FtpCommand::Noop));
    }

    #[test]
    fn test_case_insensitive_verbs() {
        assert_eq!(parse("quit\n"), Ok(FtpCommand::Quit));
        assert_eq!(
            parse("user Anonymous\n"),
            Ok(FtpCommand::User("Anonymous".to_string()))
        );
    }

    #[test]
    fn test_string_arguments() {
        assert_eq!(parse("USER ftp\n"), Ok(FtpCommand::User("ftp".to_string())));
        assert_eq!(
            parse("RETR pub/file.txt\n"),
            Ok(FtpCommand::Retr("pub/file.txt".to_string()))
        );
        assert_eq!(
            parse("CWD dir with spaces\n"),
            Ok(FtpCommand::Cwd("dir with spaces".to_string()))
        );
        // Empty string argument is accepted by the grammar.
        assert_eq!(parse("USER \n"), Ok(FtpCommand::User(String::new())));
    }

    #[test]
    fn test_missing_space_is_parameter_error() {
        assert_eq!(parse("USER\n"), Err(ParseError::Parameters));
        assert_eq!(parse("RETRfile\n"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_optional_string() {
        assert_eq!(parse("LIST\n"), Ok(FtpCommand::List(None)));
        assert_eq!(
            parse("LIST pub\n"),
            Ok(FtpCommand::List(Some("pub".to_string())))
        );
        assert_eq!(parse("NLST\n"), Ok(FtpCommand::Nlst(None)));
        assert_eq!(parse("HELP\n"), Ok(FtpCommand::Help(None)));
    }

    #[test]
    fn test_port() {
        let expected = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1024);
        assert_eq!(parse("PORT 10,0,0,1,4,0\n"), Ok(FtpCommand::Port(expected)));

        let expected = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 0x1234);
        assert_eq!(
            parse("PORT 192,168,1,2,18,52\n"),
            Ok(FtpCommand::Port(expected))
        );
    }

    #[test]
    fn test_port_malformed() {
        assert_eq!(parse("PORT 10,0,0,1,4\n"), Err(ParseError::Parameters));
        assert_eq!(parse("PORT 256,0,0,1,4,0\n"), Err(ParseError::Parameters));
        assert_eq!(parse("PORT 10,0,0,1,4,999\n"), Err(ParseError::Parameters));
        assert_eq!(parse("PORT a,b,c,d,e,f\n"), Err(ParseError::Parameters));
        assert_eq!(
            parse("PORT 10,0,0,1,4,0,9\n"),
            Err(ParseError::Parameters)
        );
    }

    #[test]
    fn test_type_forms() {
        assert_eq!(parse("TYPE A\n"), Ok(FtpCommand::Type(TypeCode::Ascii(None))));
        assert_eq!(
            parse("TYPE A N\n"),
            Ok(FtpCommand::Type(TypeCode::Ascii(Some(FormCode::NonPrint))))
        );
        assert_eq!(
            parse("TYPE A T\n"),
            Ok(FtpCommand::Type(TypeCode::Ascii(Some(FormCode::Telnet))))
        );
        assert_eq!(parse("TYPE I\n"), Ok(FtpCommand::Type(TypeCode::Image)));
        assert_eq!(parse("TYPE E\n"), Ok(FtpCommand::Type(TypeCode::Ebcdic(None))));
        assert_eq!(
            parse("TYPE L 8\n"),
            Ok(FtpCommand::Type(TypeCode::Local(8)))
        );
        assert_eq!(parse("TYPE A X\n"), Err(ParseError::Parameters));
        assert_eq!(parse("TYPE L 256\n"), Err(ParseError::Parameters));
        assert_eq!(parse("TYPE Z\n"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_structure_and_mode() {
        assert_eq!(
            parse("STRU F\n"),
            Ok(FtpCommand::Stru(StructureCode::File))
        );
        assert_eq!(
            parse("STRU R\n"),
            Ok(FtpCommand::Stru(StructureCode::Record))
        );
        assert_eq!(parse("STRU P\n"), Ok(FtpCommand::Stru(StructureCode::Page)));
        assert_eq!(parse("STRU X\n"), Err(ParseError::Parameters));

        assert_eq!(parse("MODE S\n"), Ok(FtpCommand::Mode(ModeCode::Stream)));
        assert_eq!(parse("MODE B\n"), Ok(FtpCommand::Mode(ModeCode::Block)));
        assert_eq!(
            parse("MODE C\n"),
            Ok(FtpCommand::Mode(ModeCode::Compressed))
        );
        assert_eq!(parse("MODE Z\n"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_rest_offset() {
        assert_eq!(parse("REST 0\n"), Ok(FtpCommand::Rest(0)));
        assert_eq!(parse("REST 1024\n"), Ok(FtpCommand::Rest(1024)));
        assert_eq!(
            parse(&format!("REST {}\n", i64::MAX)),
            Ok(FtpCommand::Rest(i64::MAX as u64))
        );
        // One past the host offset limit overflows.
        assert_eq!(
            parse("REST 9223372036854775808\n"),
            Err(ParseError::Parameters)
        );
        assert_eq!(parse("REST x\n"), Err(ParseError::Parameters));
        assert_eq!(parse("REST \n"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(parse("FOO\n"), Err(ParseError::Unrecognized));
        assert_eq!(parse("\n"), Err(ParseError::Unrecognized));
    }

    #[test]
    fn test_trailing_garbage() {
        assert_eq!(parse("QUIT extra\n"), Err(ParseError::Parameters));
        assert_eq!(parse("STRU FF\n"), Err(ParseError::Parameters));
        assert_eq!(parse("REST 12x\n"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_missing_newline() {
        assert_eq!(parse("QUIT"), Err(ParseError::Parameters));
        assert_eq!(parse("USER ftp"), Err(ParseError::Parameters));
    }

    #[test]
    fn test_canonical_round_trip() {
        let lines = [
            "USER anonymous\n",
            "PASS me@example.net\n",
            "CWD pub\n",
            "CDUP\n",
            "QUIT\n",
            "PORT 10,0,0,1,4,0\n",
            "PASV\n",
            "TYPE A\n",
            "TYPE A N\n",
            "TYPE I\n",
            "TYPE L 8\n",
            "STRU F\n",
            "MODE S\n",
            "RETR file.bin\n",
            "PWD\n",
            "LIST\n",
            "LIST pub\n",
            "NLST\n",
            "SYST\n",
            "HELP\n",
            "NOOP\n",
            "REST 4096\n",
            "SIZE file.bin\n",
            "MDTM file.bin\n",
        ];

        for line in lines {
            let command = FtpCommand::parse(line).unwrap();
            let reemitted = format!("{}\n", command);
            assert_eq!(FtpCommand::parse(&reemitted), Ok(command), "{:?}", line);
        }
    }
}
