//! Bounded-wait readiness polling.
//!
//! A fresh mio [`Poll`] is created per call, so polling never touches the
//! state of the socket it watches and may run on any thread.

use super::handle::TransportHandle;
use mio::{Events, Poll, Token};
use socket2::Socket;
use std::io;
use std::time::{Duration, Instant};

const POLL_TOKEN: Token = Token(0);

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Block without bound.
    #[default]
    Infinite,
    /// Block for at most this long. Zero polls once without blocking.
    After(Duration),
}

impl Timeout {
    /// Shorthand for [`Timeout::Infinite`].
    pub const INFINITE: Timeout = Timeout::Infinite;

    /// Zero and negative values poll once without blocking.
    pub fn from_millis(msec: i64) -> Self {
        let msec = u64::try_from(msec).unwrap_or(0);
        Timeout::After(Duration::from_millis(msec))
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Timeout::Infinite)
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(duration) => Some(*duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Timeout::Infinite, Timeout::After)
    }
}

/// Which direction to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Data (or an incoming connection, for listeners) is available.
    Readable,
    /// The send buffer has room.
    Writable,
}

impl Interest {
    fn to_mio(self) -> mio::Interest {
        match self {
            Interest::Readable => mio::Interest::READABLE,
            Interest::Writable => mio::Interest::WRITABLE,
        }
    }
}

/// Result of [`wait_ready`].
#[derive(Debug)]
pub enum Readiness {
    /// The socket is ready. Errors pending on the socket also count as ready;
    /// the next I/O call reports them.
    Ready,
    /// The timeout elapsed first.
    TimedOut,
    /// Polling failed, or the handle is not valid.
    Error(io::Error),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Blocks until `handle` is ready for `interest` or `timeout` elapses.
pub fn wait_ready(
    handle: &TransportHandle,
    interest: Interest,
    timeout: impl Into<Timeout>,
) -> Readiness {
    match handle.socket() {
        Ok(socket) => poll_socket(socket, interest, timeout.into()),
        Err(_) => Readiness::Error(io::Error::from(io::ErrorKind::NotConnected)),
    }
}

#[cfg(unix)]
pub(crate) fn poll_socket(socket: &Socket, interest: Interest, timeout: Timeout) -> Readiness {
    use mio::unix::SourceFd;
    use std::os::fd::AsRawFd;

    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(err) => return Readiness::Error(err),
    };
    let fd = socket.as_raw_fd();
    let mut source = SourceFd(&fd);
    if let Err(err) = poll
        .registry()
        .register(&mut source, POLL_TOKEN, interest.to_mio())
    {
        return Readiness::Error(err);
    }
    let readiness = wait(&mut poll, timeout);
    let _ = poll.registry().deregister(&mut source);
    readiness
}

// mio cannot watch a raw SOCKET on Windows, so a duplicate is wrapped in a mio
// stream for the duration of the call. Blocking mode is restored afterwards.
#[cfg(windows)]
pub(crate) fn poll_socket(socket: &Socket, interest: Interest, timeout: Timeout) -> Readiness {
    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(err) => return Readiness::Error(err),
    };
    let duplicate: std::net::TcpStream = match socket.try_clone() {
        Ok(duplicate) => duplicate.into(),
        Err(err) => return Readiness::Error(err),
    };
    if let Err(err) = duplicate.set_nonblocking(true) {
        return Readiness::Error(err);
    }
    let mut source = mio::net::TcpStream::from_std(duplicate);
    let readiness = match poll
        .registry()
        .register(&mut source, POLL_TOKEN, interest.to_mio())
    {
        Ok(()) => {
            let readiness = wait(&mut poll, timeout);
            let _ = poll.registry().deregister(&mut source);
            readiness
        }
        Err(err) => Readiness::Error(err),
    };
    drop(source);
    match socket.set_nonblocking(false) {
        Ok(()) => readiness,
        Err(err) => Readiness::Error(err),
    }
}

fn wait(poll: &mut Poll, timeout: Timeout) -> Readiness {
    // A deadline past the end of the clock is the same as no deadline
    let deadline = timeout
        .duration()
        .and_then(|duration| Instant::now().checked_add(duration));
    let mut events = Events::with_capacity(4);

    loop {
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match poll.poll(&mut events, remaining) {
            Ok(()) if !events.is_empty() => return Readiness::Ready,
            Ok(()) => {
                // Spurious wakeups are retried until the deadline passes
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Readiness::TimedOut;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Readiness::Error(err),
        }
    }
}
