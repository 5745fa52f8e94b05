//! Data-channel establishment for transfers (RFC 959, section 3.2).
//!
//! A session is always in one of two data-connection modes. In active
//! (PORT) mode the server connects out to the address the client supplied;
//! in passive (PASV) mode the server holds a bound listener and the client
//! connects in. The mode is an enum owning its resources, so replacing it
//! (a later PORT or PASV) closes any previous passive listener
//! automatically.

use crate::errors::FtpResult;
use crate::session::FtpSession;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use socket2::{Domain, Protocol, Socket, Type};

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lowest port PASV will pick; everything below is reserved territory.
pub const MIN_PASV_PORT: u16 = 1024;

/// Where the next transfer's data connection comes from.
#[derive(Debug)]
pub enum DataChannel {
    /// Active mode: connect to the client-supplied address.
    Port(SocketAddrV4),
    /// Passive mode: accept one connection on this listener.
    Passive(TcpListener),
}

/// PASV port PRNG, seeded once from the wall clock.
static PASV_RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn draw_pasv_port() -> u16 {
    let rng = PASV_RNG.get_or_init(|| {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0);
        Mutex::new(StdRng::seed_from_u64(seed))
    });
    rng.lock().unwrap().gen_range(MIN_PASV_PORT..=u16::MAX)
}

/// Bind a passive-mode listener on `ip` at a randomly drawn port,
/// retrying the draw while the port happens to be taken. Backlog is one:
/// exactly one data connection is expected.
pub fn open_passive(ip: Ipv4Addr) -> io::Result<TcpListener> {
    loop {
        let port = draw_pasv_port();
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        match socket.bind(&SocketAddrV4::new(ip, port).into()) {
            Ok(()) => {
                socket.listen(1)?;
                return Ok(socket.into());
            }
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => continue,
            Err(err) => return Err(err),
        }
    }
}

impl FtpSession {
    /// Establish the data connection for one transfer, according to the
    /// session's current mode. A failure (or, in passive mode, a
    /// connection from some other host) is reported to the client with a
    /// 425 reply and yields `None`; session state is left untouched.
    pub(crate) fn open_data_channel(&mut self) -> FtpResult<Option<TcpStream>> {
        let attempt: io::Result<(TcpStream, Option<SocketAddr>)> = match &self.data_channel {
            DataChannel::Port(addr) => TcpStream::connect(addr).map(|stream| (stream, None)),
            DataChannel::Passive(listener) => listener
                .accept()
                .map(|(stream, peer)| (stream, Some(peer))),
        };

        match attempt {
            Ok((stream, peer)) => {
                // In passive mode the connecting host must be the control
                // connection's client; anything else is a third party
                // trying to hijack the transfer.
                if let Some(peer) = peer {
                    let legitimate = match peer {
                        SocketAddr::V4(peer) => peer.ip() == self.client_addr.ip(),
                        SocketAddr::V6(_) => false,
                    };
                    if !legitimate {
                        drop(stream);
                        self.reply(
                            425,
                            "Error accepting connection; connecting host does not match client.",
                        )?;
                        return Ok(None);
                    }
                }
                Ok(Some(stream))
            }
            Err(_) => {
                self.reply(425, "Can't open data connection.")?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pasv_port_range() {
        for _ in 0..1000 {
            assert!(draw_pasv_port() >= MIN_PASV_PORT);
        }
    }

    #[test]
    fn test_open_passive_binds_listener() {
        let listener = open_passive(Ipv4Addr::LOCALHOST).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() >= MIN_PASV_PORT);

        // The listener accepts a connection on the advertised port.
        let client = TcpStream::connect(addr).unwrap();
        let (_accepted, peer) = listener.accept().unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }
}
