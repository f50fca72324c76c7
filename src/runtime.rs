//! Process-wide socket library state.
//!
//! Every socket object holds a [`Registration`]. The first registration of a
//! class runs its init hook and the last one to go away runs its teardown.
//! Counts are readable through [`socket_count`] and [`secure_socket_count`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketClass {
    Plain,
    Secure,
}

#[derive(Debug)]
struct Counter {
    class: SocketClass,
    count: AtomicUsize,
    lock: Mutex<()>,
}

impl Counter {
    const fn new(class: SocketClass) -> Self {
        Self {
            class,
            count: AtomicUsize::new(0),
            lock: Mutex::new(()),
        }
    }

    fn acquire(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.count.fetch_add(1, Ordering::SeqCst) == 0 {
            init(self.class);
        }
    }

    fn release(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            teardown(self.class);
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Live socket counters shared by the whole process.
#[derive(Debug)]
pub struct Runtime {
    plain: Counter,
    secure: Counter,
}

impl Runtime {
    fn counter(&self, class: SocketClass) -> &Counter {
        match class {
            SocketClass::Plain => &self.plain,
            SocketClass::Secure => &self.secure,
        }
    }

    /// Number of live plain socket objects.
    pub fn socket_count(&self) -> usize {
        self.plain.get()
    }

    /// Number of live secure socket objects.
    pub fn secure_socket_count(&self) -> usize {
        self.secure.get()
    }
}

/// The single access point to the process-wide counters.
pub fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| Runtime {
        plain: Counter::new(SocketClass::Plain),
        secure: Counter::new(SocketClass::Secure),
    })
}

/// Number of live plain socket objects (clients and servers).
pub fn socket_count() -> usize {
    runtime().socket_count()
}

/// Number of live secure socket objects.
pub fn secure_socket_count() -> usize {
    runtime().secure_socket_count()
}

/// Keeps a socket object counted for as long as it lives.
#[derive(Debug)]
pub(crate) struct Registration {
    class: SocketClass,
}

impl Registration {
    pub(crate) fn new(class: SocketClass) -> Self {
        runtime().counter(class).acquire();
        Self { class }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        runtime().counter(self.class).release();
    }
}

fn init(class: SocketClass) {
    match class {
        // socket2 and std initialise the platform socket library themselves.
        SocketClass::Plain => debug!("First socket object created"),
        SocketClass::Secure => {
            #[cfg(feature = "tls")]
            crate::transport::install_crypto_provider();
            debug!("First secure socket object created");
        }
    }
}

fn teardown(class: SocketClass) {
    match class {
        SocketClass::Plain => debug!("Last socket object dropped"),
        // A rustls crypto provider cannot be uninstalled once set.
        SocketClass::Secure => debug!("Last secure socket object dropped"),
    }
}
