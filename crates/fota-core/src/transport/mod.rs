//! Transport layer module.
//!
//! Bridges the push-style `NetDriver` receive path to the blocking pull
//! side the HTTP client wants. Each connection role owns one buffered
//! connection slot; a transport-wide interface lock serializes whole
//! request/response exchanges.

pub mod mock;
pub mod tcp;
pub mod traits;

pub use mock::MockNetDriver;
pub use tcp::TcpNetDriver;
pub use traits::{NetDriver, NetHandle, RecvSink, TransportError};

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Capacity of the per-connection receive buffer.
pub const RECV_BUF_SIZE: usize = 1024;

/// Purpose a connection serves. Each role gets its own connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    UpdateServer,
}

const ROLE_COUNT: usize = 1;

impl ConnectionRole {
    fn index(self) -> usize {
        match self {
            ConnectionRole::UpdateServer => 0,
        }
    }
}

/// Counting semaphore signaled once per inbound connection event.
struct Semaphore {
    permits: Mutex<u32>,
    cv: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.cv.notify_one();
    }

    fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cv.wait_timeout(permits, deadline - now).unwrap();
            permits = guard;
        }
    }
}

struct RecvState {
    data: Vec<u8>,
    closed: bool,
    overflowed: bool,
}

/// Receive-side state shared between the driver's sink and `recv`.
/// Created fresh per connection so stale events from a torn-down
/// connection cannot leak into the next one.
struct RecvShared {
    sem: Semaphore,
    state: Mutex<RecvState>,
    /// Signaled when `recv` drains the buffer or the connection ends,
    /// releasing a `deliver` call blocked on buffer room.
    room: Condvar,
}

impl RecvShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sem: Semaphore::new(),
            state: Mutex::new(RecvState {
                data: Vec::with_capacity(RECV_BUF_SIZE),
                closed: false,
                overflowed: false,
            }),
            room: Condvar::new(),
        })
    }

    fn mark_closed(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.room.notify_all();
        self.sem.release();
    }
}

struct SharedSink(Arc<RecvShared>);

impl RecvSink for SharedSink {
    fn deliver(&self, data: Option<&[u8]>) {
        let shared = &self.0;
        let Some(data) = data else {
            shared.mark_closed();
            return;
        };

        let mut state = shared.state.lock().unwrap();
        if state.closed || state.overflowed {
            return;
        }
        if data.len() > RECV_BUF_SIZE {
            // No amount of draining can make this event fit. Fail the
            // connection rather than truncate the stream.
            warn!(len = data.len(), "Inbound event exceeds receive buffer");
            state.overflowed = true;
            drop(state);
            shared.sem.release();
            return;
        }
        while state.data.len() + data.len() > RECV_BUF_SIZE {
            state = shared.room.wait(state).unwrap();
            if state.closed || state.overflowed {
                return;
            }
        }
        state.data.extend_from_slice(data);
        drop(state);
        shared.sem.release();
    }
}

struct Connection {
    handle: NetHandle,
    shared: Arc<RecvShared>,
}

/// Role-slotted connection manager over a `NetDriver`.
pub struct Transport<N: NetDriver> {
    driver: N,
    host: String,
    iface: Mutex<()>,
    slots: [Mutex<Option<Connection>>; ROLE_COUNT],
}

impl<N: NetDriver> Transport<N> {
    pub fn new(driver: N, host: impl Into<String>) -> Self {
        Self {
            driver,
            host: host.into(),
            iface: Mutex::new(()),
            slots: [Mutex::new(None)],
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn driver(&self) -> &N {
        &self.driver
    }

    /// Serialize a whole request/response exchange on the interface.
    /// Hold the guard across connect, send and recv.
    pub fn lock_interface(&self) -> MutexGuard<'_, ()> {
        match self.iface.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Open the role's connection if not already open. A second connect on
    /// an open slot is a no-op.
    pub fn connect(&self, role: ConnectionRole, port: u16) -> Result<(), TransportError> {
        if !self.driver.ready() {
            return Err(TransportError::NotReady);
        }

        let mut slot = self.slots[role.index()].lock().unwrap();
        if slot.is_some() {
            return Ok(());
        }

        let shared = RecvShared::new();
        let sink: Arc<dyn RecvSink> = Arc::new(SharedSink(Arc::clone(&shared)));
        let handle = self.driver.connect(&self.host, port, sink)?;
        debug!(host = %self.host, port, ?role, "Connected");

        *slot = Some(Connection { handle, shared });
        Ok(())
    }

    /// Send on the role's connection. A failed send tears the connection
    /// down before the error is returned.
    pub fn send(&self, role: ConnectionRole, data: &[u8]) -> Result<(), TransportError> {
        let handle = {
            let slot = self.slots[role.index()].lock().unwrap();
            slot.as_ref().ok_or(TransportError::NotConnected)?.handle
        };

        if let Err(e) = self.driver.send(handle, data) {
            warn!(?role, error = %e, "Send failed, closing connection");
            self.close(role);
            return Err(e);
        }
        Ok(())
    }

    /// Receive buffered data for the role.
    ///
    /// Returns the number of bytes copied into `buf`; `Ok(0)` means the
    /// peer closed the connection with nothing left buffered. Expiry of
    /// `timeout` with no event is `Err(Timeout)`.
    pub fn recv(
        &self,
        role: ConnectionRole,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let shared = {
            let slot = self.slots[role.index()].lock().unwrap();
            Arc::clone(&slot.as_ref().ok_or(TransportError::NotConnected)?.shared)
        };

        loop {
            if !shared.sem.acquire_timeout(timeout) {
                return Err(TransportError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            let mut state = shared.state.lock().unwrap();
            if state.overflowed {
                drop(state);
                self.close(role);
                return Err(TransportError::BufferOverflow);
            }
            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                buf[..n].copy_from_slice(&state.data[..n]);
                state.data.drain(..n);
                if !state.data.is_empty() {
                    // Leftover stays readable without another event.
                    shared.sem.release();
                }
                drop(state);
                shared.room.notify_all();
                return Ok(n);
            }
            if state.closed {
                // Keep the close observable to any further recv call.
                shared.sem.release();
                return Ok(0);
            }
            // Stale permit from an already drained event; wait again.
        }
    }

    /// Close the role's connection. Safe to call when not connected.
    pub fn close(&self, role: ConnectionRole) {
        let conn = self.slots[role.index()].lock().unwrap().take();
        if let Some(conn) = conn {
            conn.shared.mark_closed();
            self.driver.close(conn.handle);
            debug!(?role, "Connection closed");
        }
    }
}
