// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A small `sd_notify(3)`-compatible client: publishes textual status
//! strings and watchdog keepalives to the process supervisor named by
//! `$NOTIFY_SOCKET`. A silent no-op when that variable is unset, so the
//! gateway runs standalone without error.

use std::{os::unix::net::UnixDatagram, path::Path, time::Duration};

use tracing::debug;

/// Used for the `WATCHDOG=1` keepalive cadence when no supervisor watchdog
/// is negotiated (`$WATCHDOG_USEC` unset), e.g. running standalone.
const DEFAULT_WATCHDOG_PERIOD: Duration = Duration::from_secs(10);

/// Resolved once at startup; cheap to clone, held by every component that
/// needs to publish a status string.
#[derive(Clone)]
pub struct Liveness {
    socket_path: Option<String>,
    watchdog_usec: Option<u64>,
}

impl Liveness {
    pub fn from_env() -> Self {
        Liveness {
            socket_path: std::env::var("NOTIFY_SOCKET").ok(),
            watchdog_usec: std::env::var("WATCHDOG_USEC").ok().and_then(|s| s.parse::<u64>().ok()),
        }
    }

    /// The cadence `sd_notify(3)` specifies for `WATCHDOG=1` keepalives: half
    /// the supervisor's own negotiated watchdog timeout, published via
    /// `$WATCHDOG_USEC` (microseconds). Falls back to a documented default
    /// when no supervisor watchdog is configured.
    pub fn watchdog_period(&self) -> Duration {
        match self.watchdog_usec {
            Some(usec) => Duration::from_micros(usec) / 2,
            None => DEFAULT_WATCHDOG_PERIOD,
        }
    }

    pub fn status(&self, text: &str) {
        self.send(&format!("STATUS={text}"));
    }

    pub fn ready(&self) {
        self.send("READY=1");
    }

    pub fn watchdog_keepalive(&self) {
        self.send("WATCHDOG=1");
    }

    fn send(&self, message: &str) {
        let Some(path) = &self.socket_path else {
            return;
        };
        if let Err(e) = send_datagram(path, message) {
            debug!(error = %e, "liveness notification failed, ignoring");
        }
    }
}

fn send_datagram(socket_path: &str, message: &str) -> std::io::Result<()> {
    let sock = UnixDatagram::unbound()?;
    if let Some(name) = socket_path.strip_prefix('@') {
        send_abstract(&sock, name, message)
    } else {
        sock.send_to(message.as_bytes(), Path::new(socket_path))?;
        Ok(())
    }
}

/// Abstract-namespace Unix sockets (path begins with a NUL byte rather than
/// living on the filesystem) aren't reachable through `UnixDatagram::send_to`,
/// which always treats its argument as a filesystem path — so the raw
/// `sendto(2)` call is made directly, substituting the leading `@` for the
/// NUL byte the kernel expects.
fn send_abstract(sock: &UnixDatagram, name: &str, message: &str) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let name_bytes = name.as_bytes();
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let max_len = addr.sun_path.len() - 1;
    if name_bytes.len() > max_len {
        return Err(std::io::Error::other(format!(
            "abstract socket name too long: {} bytes (max {max_len})",
            name_bytes.len()
        )));
    }
    for (i, &b) in name_bytes.iter().enumerate() {
        addr.sun_path[i + 1] = b as libc::c_char;
    }
    let addr_len = std::mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len();

    let msg_bytes = message.as_bytes();
    let ret = unsafe {
        libc::sendto(
            sock.as_raw_fd(),
            msg_bytes.as_ptr().cast(),
            msg_bytes.len(),
            libc::MSG_NOSIGNAL,
            (&raw const addr).cast(),
            addr_len as libc::socklen_t,
        )
    };

    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_notify_socket_is_a_silent_no_op() {
        // SAFETY: test-only env var mutation, no other thread reads it here.
        unsafe { std::env::remove_var("NOTIFY_SOCKET") };
        let liveness = Liveness::from_env();
        liveness.status("this must not panic or error");
    }

    #[test]
    fn watchdog_period_falls_back_to_default_when_unset() {
        let liveness = Liveness { socket_path: None, watchdog_usec: None };
        assert_eq!(liveness.watchdog_period(), DEFAULT_WATCHDOG_PERIOD);
    }

    #[test]
    fn watchdog_period_halves_the_negotiated_watchdog_usec() {
        let liveness = Liveness { socket_path: None, watchdog_usec: Some(4_000_000) };
        assert_eq!(liveness.watchdog_period(), Duration::from_secs(2));
    }
}
