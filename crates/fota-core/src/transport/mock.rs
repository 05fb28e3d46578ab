//! Mock network driver for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::traits::{NetDriver, NetHandle, RecvSink, TransportError};

enum Script {
    /// Deliver the fragments in order, then close.
    Respond(Vec<Vec<u8>>),
    /// Deliver nothing and leave the connection open.
    Silence,
}

/// Mock driver for unit testing transport and client logic.
///
/// Each accepted connection consumes one queued script and plays it back
/// from a background thread, the way a real stack delivers inbound data
/// from its own context.
pub struct MockNetDriver {
    scripts: Mutex<VecDeque<Script>>,
    write_log: Mutex<Vec<Vec<u8>>>,
    ready: AtomicBool,
    refuse: AtomicBool,
    connects: AtomicU64,
    closes: AtomicU64,
}

impl MockNetDriver {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            write_log: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
            refuse: AtomicBool::new(false),
            connects: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        }
    }

    /// Queue one response, delivered in a single fragment, for the next
    /// connection. The connection closes after delivery.
    pub fn queue_response(&self, data: &[u8]) {
        self.queue_fragments(vec![data.to_vec()]);
    }

    /// Queue one response delivered as multiple fragments.
    pub fn queue_fragments(&self, fragments: Vec<Vec<u8>>) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Respond(fragments));
    }

    /// Queue a connection that accepts but never responds.
    pub fn queue_silence(&self) {
        self.scripts.lock().unwrap().push_back(Script::Silence);
    }

    /// Get all captured sends.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Simulate the network interface going up or down.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make further connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for MockNetDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl NetDriver for MockNetDriver {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn connect(
        &self,
        host: &str,
        port: u16,
        sink: Arc<dyn RecvSink>,
    ) -> Result<NetHandle, TransportError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                message: "connection refused".into(),
            });
        }

        let handle = NetHandle(self.connects.fetch_add(1, Ordering::SeqCst));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Silence);

        if let Script::Respond(fragments) = script {
            thread::spawn(move || {
                for fragment in fragments {
                    sink.deliver(Some(&fragment));
                }
                sink.deliver(None);
            });
        }

        Ok(handle)
    }

    fn send(&self, _handle: NetHandle, data: &[u8]) -> Result<(), TransportError> {
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn close(&self, _handle: NetHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelSink(Mutex<mpsc::Sender<Option<Vec<u8>>>>);

    impl RecvSink for ChannelSink {
        fn deliver(&self, data: Option<&[u8]>) {
            let _ = self.0.lock().unwrap().send(data.map(<[u8]>::to_vec));
        }
    }

    #[test]
    fn test_scripted_fragments_then_close() {
        let mock = MockNetDriver::new();
        mock.queue_fragments(vec![b"one".to_vec(), b"two".to_vec()]);

        let (tx, rx) = mpsc::channel();
        mock.connect("server", 8080, Arc::new(ChannelSink(Mutex::new(tx))))
            .unwrap();

        assert_eq!(rx.recv().unwrap(), Some(b"one".to_vec()));
        assert_eq!(rx.recv().unwrap(), Some(b"two".to_vec()));
        assert_eq!(rx.recv().unwrap(), None);
    }

    #[test]
    fn test_write_capture() {
        let mock = MockNetDriver::new();
        let handle = NetHandle(0);
        mock.send(handle, b"GET / HTTP/1.1").unwrap();
        mock.send(handle, b"body").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"GET / HTTP/1.1");
    }

    #[test]
    fn test_refused_connection() {
        let mock = MockNetDriver::new();
        mock.refuse_connections(true);

        let (tx, _rx) = mpsc::channel();
        let result = mock.connect("server", 8080, Arc::new(ChannelSink(Mutex::new(tx))));
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
