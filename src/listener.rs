//! Control-connection listener and acceptor.
//!
//! The listener owns the bound socket and a shutdown pipe. Its acceptor
//! thread multiplexes the two: a byte on the pipe means stop accepting,
//! close up, and exit; a readable socket means a client is waiting. Each
//! accepted connection gets its own worker thread; the only state shared
//! with the workers is the connection counter and the condition variable
//! [`stop`] drains on.
//!
//! [`stop`]: FtpListener::stop

use crate::connection;
use crate::errors::{FtpError, FtpResult};

use log::{error, info, warn};
use nix::sys::select::{FdSet, select};
use nix::sys::time::TimeVal;
use socket2::{Domain, Protocol, Socket, Type};

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, OwnedFd};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Consecutive hard accept failures tolerated before the acceptor quits.
const MAX_ACCEPT_ERRORS: u32 = 10;

/// Listen backlog, the usual SOMAXCONN.
const LISTEN_BACKLOG: i32 = 128;

/// State shared between the listener, its acceptor, and the workers.
pub(crate) struct ListenerShared {
    /// Real directory served as the FTP root.
    pub dir: PathBuf,
    pub max_connections: usize,
    pub inactivity_timeout: Option<Duration>,
    pub num_connections: Mutex<usize>,
    pub shutdown_cond: Condvar,
}

pub struct FtpListener {
    /// Present until [`start`] hands it to the acceptor thread.
    ///
    /// [`start`]: FtpListener::start
    socket: Option<TcpListener>,
    shutdown_send: OwnedFd,
    shutdown_recv: Option<OwnedFd>,
    shared: Arc<ListenerShared>,
    acceptor: Option<JoinHandle<()>>,
}

impl FtpListener {
    /// Bind the listening socket (IPv4; all interfaces unless `address`
    /// names one) and set up the shutdown machinery. No connections are
    /// accepted until [`start`].
    ///
    /// [`start`]: FtpListener::start
    pub fn new(
        address: Option<&str>,
        port: u16,
        max_connections: usize,
        inactivity_timeout: Option<Duration>,
        dir: PathBuf,
    ) -> FtpResult<Self> {
        let bind_ip = match address {
            None => Ipv4Addr::UNSPECIFIED,
            Some(name) => resolve_ipv4(name)?,
        };

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddrV4::new(bind_ip, port).into())?;
        socket.listen(LISTEN_BACKLOG)?;
        // The acceptor selects before accepting; the socket must not block
        // it if a pending client vanishes in between.
        socket.set_nonblocking(true)?;

        let (shutdown_recv, shutdown_send) = nix::unistd::pipe()?;

        Ok(Self {
            socket: Some(socket.into()),
            shutdown_send,
            shutdown_recv: Some(shutdown_recv),
            shared: Arc::new(ListenerShared {
                dir,
                max_connections,
                inactivity_timeout,
                num_connections: Mutex::new(0),
                shutdown_cond: Condvar::new(),
            }),
            acceptor: None,
        })
    }

    /// The bound address, for callers that asked for an ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Spawn the acceptor thread.
    pub fn start(&mut self) -> FtpResult<()> {
        let socket = self
            .socket
            .take()
            .ok_or_else(|| FtpError::Startup("listener already started".into()))?;
        let shutdown_recv = self
            .shutdown_recv
            .take()
            .ok_or_else(|| FtpError::Startup("listener already started".into()))?;
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name("ftp-acceptor".to_string())
            .spawn(move || accept_loop(socket, shutdown_recv, shared))
            .map_err(FtpError::Io)?;
        self.acceptor = Some(handle);
        Ok(())
    }

    /// Wake the acceptor, wait for every worker to finish, then reap the
    /// acceptor thread.
    pub fn stop(&mut self) {
        let _ = nix::unistd::write(&self.shutdown_send, b"\0");

        let mut count = self.shared.num_connections.lock().unwrap();
        while *count > 0 {
            count = self.shared.shutdown_cond.wait(count).unwrap();
        }
        drop(count);

        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

fn resolve_ipv4(name: &str) -> FtpResult<Ipv4Addr> {
    let addrs = (name, 0u16).to_socket_addrs().map_err(|err| {
        FtpError::Configuration(format!("error resolving listen address '{}': {}", name, err))
    })?;
    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Ok(*v4.ip());
        }
    }
    Err(FtpError::Configuration(format!(
        "no IPv4 address found for '{}'",
        name
    )))
}

/// Accept connections until told to stop or too many things go wrong.
fn accept_loop(socket: TcpListener, shutdown: OwnedFd, shared: Arc<ListenerShared>) {
    let mut consecutive_errors: u32 = 0;

    loop {
        let (shutdown_ready, socket_ready) = {
            let socket_fd = socket.as_fd();
            let shutdown_fd = shutdown.as_fd();
            let mut read_fds = FdSet::new();
            read_fds.insert(socket_fd);
            read_fds.insert(shutdown_fd);

            match select(
                None::<i32>,
                &mut read_fds,
                None::<&mut FdSet>,
                None::<&mut FdSet>,
                None::<&mut TimeVal>,
            ) {
                Ok(_) => (
                    read_fds.contains(shutdown_fd),
                    read_fds.contains(socket_fd),
                ),
                // EINTR; go around.
                Err(_) => (false, false),
            }
        };

        if shutdown_ready {
            info!("listener shut down, no longer accepting connections");
            return;
        }
        if !socket_ready {
            continue;
        }

        let (stream, client_addr) = match socket.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
            Err(err)
                if err.kind() == io::ErrorKind::ConnectionAborted
                    || err.kind() == io::ErrorKind::ConnectionReset =>
            {
                warn!("interruption accepting FTP connection; {}", err);
                continue;
            }
            Err(err) => {
                error!("error accepting FTP connection; {}", err);
                consecutive_errors += 1;
                if consecutive_errors >= MAX_ACCEPT_ERRORS {
                    error!("too many consecutive errors, FTP server exiting");
                    return;
                }
                continue;
            }
        };
        consecutive_errors = 0;

        if let Err(err) = stream.set_nodelay(true) {
            error!("error in setsockopt(), FTP server dropping connection; {}", err);
            continue;
        }
        // The locally bound address of the accepted socket is what PASV
        // advertises later.
        let server_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!("error in getsockname(), FTP server dropping connection; {}", err);
                continue;
            }
        };
        let (client_v4, server_v4) = match (client_addr, server_addr) {
            (SocketAddr::V4(client), SocketAddr::V4(server)) => (client, server),
            _ => {
                error!("non-IPv4 connection on IPv4 listener, dropping");
                continue;
            }
        };

        let shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("ftp-session".to_string())
            .spawn(move || connection::run(stream, client_v4, server_v4, shared));
        if let Err(err) = spawned {
            error!("error creating session thread; {}", err);
        }
    }
}
