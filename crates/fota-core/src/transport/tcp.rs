//! TCP-based network driver implementation.
//!
//! Host-stack backend over `std::net`. Each connection gets a reader
//! thread that pushes inbound data into the sink, mirroring how an
//! embedded stack raises receive events from its own context.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::traits::{NetDriver, NetHandle, RecvSink, TransportError};

const READ_CHUNK: usize = 512;

/// TCP driver backed by the host network stack.
pub struct TcpNetDriver {
    connect_timeout: Duration,
    streams: Mutex<HashMap<NetHandle, TcpStream>>,
    next_handle: AtomicU64,
}

impl TcpNetDriver {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            streams: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn reader_loop(mut stream: TcpStream, sink: Arc<dyn RecvSink>, handle: NetHandle) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => sink.deliver(Some(&chunk[..n])),
                Err(e) => {
                    debug!(?handle, error = %e, "Reader stopped");
                    break;
                }
            }
        }
        sink.deliver(None);
    }
}

impl NetDriver for TcpNetDriver {
    fn ready(&self) -> bool {
        true
    }

    fn connect(
        &self,
        host: &str,
        port: u16,
        sink: Arc<dyn RecvSink>,
    ) -> Result<NetHandle, TransportError> {
        let fail = |message: String| TransportError::ConnectFailed {
            host: host.to_string(),
            port,
            message,
        };

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| fail(e.to_string()))?
            .next()
            .ok_or_else(|| fail("no address resolved".into()))?;

        let stream =
            TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|e| fail(e.to_string()))?;

        let handle = NetHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let reader = stream
            .try_clone()
            .map_err(|e| fail(e.to_string()))?;
        self.streams.lock().unwrap().insert(handle, stream);

        thread::spawn(move || Self::reader_loop(reader, sink, handle));
        debug!(host, port, ?handle, "TCP connection established");
        Ok(handle)
    }

    fn send(&self, handle: NetHandle, data: &[u8]) -> Result<(), TransportError> {
        let mut streams = self.streams.lock().unwrap();
        let stream = streams
            .get_mut(&handle)
            .ok_or(TransportError::NotConnected)?;
        stream
            .write_all(data)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn close(&self, handle: NetHandle) {
        if let Some(stream) = self.streams.lock().unwrap().remove(&handle) {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                warn!(?handle, error = %e, "Shutdown failed");
            }
        }
    }
}
