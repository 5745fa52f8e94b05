use std::fmt;

use telnet_channel::ChannelError;

/// Custom configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// An option's value failed validation
    InvalidValue(String, String),

    /// An option that is not in the option table
    UnknownOption(String),

    /// An option without its required value, or a missing positional
    MissingArgument(String),

    /// More positional arguments than user name + root directory
    TooManyArguments,

    /// `-h` was given; the caller prints usage and exits cleanly
    HelpRequested,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(option, value) => {
                write!(f, "invalid value '{}' for option '{}'", value, option)
            }
            ConfigError::UnknownOption(option) => write!(f, "unknown option: '{}'", option),
            ConfigError::MissingArgument(what) => write!(f, "missing {}", what),
            ConfigError::TooManyArguments => {
                write!(f, "too many arguments on the command line")
            }
            ConfigError::HelpRequested => write!(f, "help requested"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom FTP server errors
#[derive(Debug)]
pub enum FtpError {
    /// I/O related errors (network, file operations, etc.)
    Io(std::io::Error),

    /// Control channel failed (sticky error, EOF, or inactivity timeout)
    Channel(ChannelError),

    /// Configuration error
    Configuration(String),

    /// Failure during process startup, before connections are accepted
    Startup(String),
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpError::Io(err) => write!(f, "I/O error: {}", err),
            FtpError::Channel(err) => write!(f, "control channel error: {}", err),
            FtpError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            FtpError::Startup(msg) => write!(f, "startup error: {}", msg),
        }
    }
}

impl std::error::Error for FtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FtpError::Io(err) => Some(err),
            FtpError::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FtpError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted => FtpError::Channel(ChannelError::Closed),
            _ => FtpError::Io(err),
        }
    }
}

impl From<ChannelError> for FtpError {
    fn from(err: ChannelError) -> Self {
        FtpError::Channel(err)
    }
}

impl From<ConfigError> for FtpError {
    fn from(err: ConfigError) -> Self {
        FtpError::Configuration(err.to_string())
    }
}

impl From<nix::errno::Errno> for FtpError {
    fn from(err: nix::errno::Errno) -> Self {
        FtpError::Io(err.into())
    }
}

/// Result type alias for FTP server operations
pub type FtpResult<T> = Result<T, FtpError>;
