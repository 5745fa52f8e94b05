use crate::errors::ConfigError;

use std::time::Duration;

/// Port the listener binds when none is given.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default cap on concurrent client sessions.
pub const DEFAULT_MAX_CLIENTS: usize = 50;

/// Default inactivity timeout applied to idle control connections.
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone)]
pub struct FtpConfig {
    /// TCP port for the control-connection listener.
    pub port: u16,

    /// Interface to bind; `None` means all interfaces.
    pub bind_address: Option<String>,

    /// Connections beyond this are dropped with a 421 reply.
    pub max_connections: usize,

    /// Idle control connections are torn down after this; `None` disables.
    pub inactivity_timeout: Option<Duration>,

    /// Unprivileged user the server runs as after binding.
    pub user_name: String,

    /// Directory served as the FTP root (chroot target).
    pub root_directory: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_FTP_PORT,
            bind_address: None,
            max_connections: DEFAULT_MAX_CLIENTS,
            inactivity_timeout: Some(Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS)),
            user_name: String::new(),
            root_directory: String::new(),
        }
    }
}

impl FtpConfig {
    /// Parse command-line arguments (everything after the program name).
    ///
    /// `anonftpd [options] <user_name> <root_directory>` with `-p <port>`,
    /// `-i <address>`, `-m <max clients>`, `-t <idle seconds, 0 disables>`
    /// and `-h` for usage.
    pub fn parse_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut positionals: Vec<&str> = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-p" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| ConfigError::MissingArgument("port number".into()))?;
                    config.port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|port| *port > 0)
                        .ok_or_else(|| ConfigError::InvalidValue("-p".into(), value.clone()))?;
                }
                "-i" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| ConfigError::MissingArgument("interface".into()))?;
                    config.bind_address = Some(value.clone());
                }
                "-m" => {
                    let value = iter.next().ok_or_else(|| {
                        ConfigError::MissingArgument("number of max clients".into())
                    })?;
                    config.max_connections = value
                        .parse::<usize>()
                        .ok()
                        .filter(|max| *max > 0)
                        .ok_or_else(|| ConfigError::InvalidValue("-m".into(), value.clone()))?;
                }
                "-t" => {
                    let value = iter.next().ok_or_else(|| {
                        ConfigError::MissingArgument("inactivity timeout".into())
                    })?;
                    let seconds = value
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidValue("-t".into(), value.clone()))?;
                    config.inactivity_timeout = if seconds == 0 {
                        None
                    } else {
                        Some(Duration::from_secs(seconds))
                    };
                }
                "-h" => return Err(ConfigError::HelpRequested),
                other if other.starts_with('-') => {
                    return Err(ConfigError::UnknownOption(other.to_string()));
                }
                positional => positionals.push(positional),
            }
        }

        match positionals.as_slice() {
            [user, dir] => {
                config.user_name = user.to_string();
                config.root_directory = dir.to_string();
                Ok(config)
            }
            [] | [_] => Err(ConfigError::MissingArgument(
                "user and/or directory name".into(),
            )),
            _ => Err(ConfigError::TooManyArguments),
        }
    }

    /// Usage text printed for `-h` and argument errors.
    pub fn usage(program: &str) -> String {
        format!(
            " Syntax: {} [ options... ] user_name root_directory\n\
             \x20Options:\n\
             \x20-p <num>\n\
             \x20    Set the port to listen on (Default: {})\n\
             \x20-i <IP address>\n\
             \x20    Set the interface to listen on (Default: all)\n\
             \x20-m <num>\n\
             \x20    Set the number of clients allowed at one time (Default: {})\n\
             \x20-t <num>\n\
             \x20    Set the inactivity timeout in seconds, 0 to disable (Default: {})\n",
            program, DEFAULT_FTP_PORT, DEFAULT_MAX_CLIENTS, DEFAULT_INACTIVITY_TIMEOUT_SECS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = FtpConfig::parse_args(&args(&["ftp", "/srv/ftp"])).unwrap();
        assert_eq!(config.port, DEFAULT_FTP_PORT);
        assert_eq!(config.bind_address, None);
        assert_eq!(config.max_connections, DEFAULT_MAX_CLIENTS);
        assert_eq!(
            config.inactivity_timeout,
            Some(Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS))
        );
        assert_eq!(config.user_name, "ftp");
        assert_eq!(config.root_directory, "/srv/ftp");
    }

    #[test]
    fn test_all_options() {
        let config = FtpConfig::parse_args(&args(&[
            "-p", "2121", "-i", "127.0.0.1", "-m", "5", "-t", "60", "ftp", "/srv/ftp",
        ]))
        .unwrap();
        assert_eq!(config.port, 2121);
        assert_eq!(config.bind_address.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_timeout_zero_disables() {
        let config = FtpConfig::parse_args(&args(&["-t", "0", "ftp", "/srv/ftp"])).unwrap();
        assert_eq!(config.inactivity_timeout, None);
    }

    #[test]
    fn test_missing_positionals() {
        assert!(matches!(
            FtpConfig::parse_args(&args(&[])),
            Err(ConfigError::MissingArgument(_))
        ));
        assert!(matches!(
            FtpConfig::parse_args(&args(&["ftp"])),
            Err(ConfigError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_too_many_positionals() {
        assert!(matches!(
            FtpConfig::parse_args(&args(&["ftp", "/srv/ftp", "extra"])),
            Err(ConfigError::TooManyArguments)
        ));
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            FtpConfig::parse_args(&args(&["-p", "0", "ftp", "/srv/ftp"])),
            Err(ConfigError::InvalidValue(_, _))
        ));
        assert!(matches!(
            FtpConfig::parse_args(&args(&["-p", "99999", "ftp", "/srv/ftp"])),
            Err(ConfigError::InvalidValue(_, _))
        ));
        assert!(matches!(
            FtpConfig::parse_args(&args(&["-m", "zero", "ftp", "/srv/ftp"])),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_unknown_option_and_help() {
        assert!(matches!(
            FtpConfig::parse_args(&args(&["-z", "ftp", "/srv/ftp"])),
            Err(ConfigError::UnknownOption(_))
        ));
        assert!(matches!(
            FtpConfig::parse_args(&args(&["-h"])),
            Err(ConfigError::HelpRequested)
        ));
    }
}
