//! systemd readiness notification
//!
//! Sends `READY=1` once the loop is running and `STOPPING=1` when it starts
//! shutting down, over the datagram socket named by `$NOTIFY_SOCKET`.

use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Client for the service manager's notification socket
#[derive(Debug, Clone)]
pub struct SystemdNotifier {
    socket: PathBuf,
}

impl SystemdNotifier {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Notifier for `$NOTIFY_SOCKET`, if the service manager set one
    pub fn from_env() -> Option<Self> {
        match std::env::var_os("NOTIFY_SOCKET") {
            Some(socket) if !socket.is_empty() => Some(Self::new(socket)),
            _ => {
                warn!("--systemd given but NOTIFY_SOCKET is not set");
                None
            }
        }
    }

    pub fn ready(&self) {
        self.send_logged("READY=1");
    }

    pub fn stopping(&self) {
        self.send_logged("STOPPING=1");
    }

    fn send_logged(&self, state: &str) {
        match self.send(state) {
            Ok(()) => debug!("Notified service manager: {}", state),
            Err(e) => warn!("Failed to notify service manager ({}): {}", state, e),
        }
    }

    #[cfg(unix)]
    fn send(&self, state: &str) -> io::Result<()> {
        use std::os::unix::ffi::OsStrExt;
        use std::os::unix::net::UnixDatagram;

        let socket = UnixDatagram::unbound()?;
        let raw = self.socket.as_os_str().as_bytes();

        // Leading '@' names a socket in the abstract namespace
        if let Some(name) = raw.strip_prefix(b"@") {
            #[cfg(target_os = "linux")]
            {
                use std::os::linux::net::SocketAddrExt;
                use std::os::unix::net::SocketAddr;

                let addr = SocketAddr::from_abstract_name(name)?;
                socket.send_to_addr(state.as_bytes(), &addr)?;
                return Ok(());
            }

            #[cfg(not(target_os = "linux"))]
            {
                let _ = name;
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "abstract sockets are Linux-only",
                ));
            }
        }

        socket.send_to(state.as_bytes(), &self.socket)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(&self, _state: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "systemd notification requires a Unix platform",
        ))
    }
}
