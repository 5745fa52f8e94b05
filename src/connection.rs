//! Per-connection worker: admission control, session setup, cleanup.
//!
//! Runs on its own thread for the whole life of one control connection.
//! The connection counter is bumped on entry and released by a drop guard,
//! so the listener's shutdown drain sees the decrement even if a session
//! unwinds.

use crate::listener::ListenerShared;
use crate::session::FtpSession;

use log::{debug, error, info};
use telnet_channel::TelnetChannel;

use std::net::{SocketAddrV4, TcpStream};
use std::sync::Arc;

pub(crate) fn run(
    stream: TcpStream,
    client_addr: SocketAddrV4,
    server_addr: SocketAddrV4,
    shared: Arc<ListenerShared>,
) {
    let connections = {
        let mut count = shared.num_connections.lock().unwrap();
        *count += 1;
        *count
    };
    let _cleanup = CleanupGuard {
        shared: &shared,
        client_addr,
    };

    info!(
        "{} port {} connection requested",
        client_addr.ip(),
        client_addr.port()
    );

    let channel = TelnetChannel::new(stream, shared.inactivity_timeout);
    let mut session = FtpSession::new(channel, client_addr, server_addr, shared.dir.clone());

    if connections <= shared.max_connections {
        if let Err(err) = session.run() {
            debug!(
                "{} port {} session ended; {}",
                client_addr.ip(),
                client_addr.port(),
                err
            );
        }
    } else {
        error!(
            "{} port {} exceeds max users ({}), dropping connection",
            client_addr.ip(),
            client_addr.port(),
            shared.max_connections
        );
        let _ = session.drop_session(&format!(
            "Too many users logged in ({} logins maximum)",
            shared.max_connections
        ));
    }
}

struct CleanupGuard<'a> {
    shared: &'a ListenerShared,
    client_addr: SocketAddrV4,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let mut count = match self.shared.num_connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count -= 1;
        self.shared.shutdown_cond.notify_all();

        info!(
            "{} port {} disconnected",
            self.client_addr.ip(),
            self.client_addr.port()
        );
    }
}
