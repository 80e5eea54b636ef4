//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{LineTransport, TransportError};

/// Mock transport for unit testing the DFU session.
///
/// Device output is a script of lines and silences consumed one per read.
/// Once the script runs out the mock reports `Disconnected`, so a test whose
/// script is too short fails fast instead of spinning. Clones share state,
/// which lets a test keep a handle after moving the transport into a session;
/// only the original counts as the session's port for `is_released`.
pub struct MockTransport {
    /// Scripted device output; `None` is one poll with nothing received.
    script: Arc<Mutex<VecDeque<Option<String>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Set once the session dropped its handle.
    released: Arc<Mutex<bool>>,
    owner: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            released: Arc::new(Mutex::new(false)),
            owner: true,
        }
    }

    /// Queue a line to be returned on a later read.
    pub fn queue_line(&self, line: &str) {
        self.script.lock().unwrap().push_back(Some(line.to_string()));
    }

    pub fn queue_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.queue_line(line);
        }
    }

    /// Queue `polls` reads that time out with nothing received.
    pub fn queue_silence(&self, polls: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..polls {
            script.push_back(None);
        }
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes as text.
    pub fn written_text(&self) -> Vec<String> {
        self.get_writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Script entries not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    /// Simulate the port going away.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    /// Whether the owning handle has been dropped.
    pub fn is_released(&self) -> bool {
        *self.released.lock().unwrap()
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            write_log: Arc::clone(&self.write_log),
            connected: Arc::clone(&self.connected),
            released: Arc::clone(&self.released),
            owner: false,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if self.owner {
            *self.released.lock().unwrap() = true;
        }
    }
}

impl LineTransport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Disconnected)
    }
}
