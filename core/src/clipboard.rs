//! Clipboard adapter (component L): the thin boundary to the local OS
//! clipboard. Per the design notes, the platform-specific implementation
//! (and the `associate`/`notify` companion callbacks it sits alongside) is
//! out of scope — only the interface is specified here, with a mock
//! implementation for tests.

use anyhow::Result;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardContent {
    Empty,
    Text(String),
    Image { mime: String, width: u32, height: u32, bytes: Vec<u8> },
}

pub trait ClipboardAdapter: Send + Sync {
    /// The current local clipboard content.
    fn read(&self) -> Result<ClipboardContent>;

    /// Write to the local clipboard (the inbound delivery path, 4.J).
    fn write_local(&self, content: ClipboardContent) -> Result<()>;

    /// Register a callback fired after every user-initiated local
    /// clipboard change (the outbound trigger, 4.J).
    fn on_local_change(&self, callback: Box<dyn Fn(ClipboardContent) + Send + Sync>) -> Result<()>;
}

/// In-memory clipboard double for tests.
pub struct MockClipboard {
    content: Arc<Mutex<ClipboardContent>>,
    callbacks: Arc<Mutex<Vec<Box<dyn Fn(ClipboardContent) + Send + Sync>>>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self {
            content: Arc::new(Mutex::new(ClipboardContent::Empty)),
            callbacks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulate a user-initiated copy: updates the content and fires
    /// `on_local_change` callbacks, exactly as a real platform hook would.
    pub fn simulate_copy(&self, content: ClipboardContent) {
        {
            let mut c = self.content.lock().unwrap();
            *c = content.clone();
        }
        let cbs = self.callbacks.lock().unwrap();
        for cb in cbs.iter() {
            cb(content.clone());
        }
    }
}

impl Default for MockClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardAdapter for MockClipboard {
    fn read(&self) -> Result<ClipboardContent> {
        Ok(self.content.lock().unwrap().clone())
    }

    fn write_local(&self, content: ClipboardContent) -> Result<()> {
        let mut c = self.content.lock().unwrap();
        *c = content;
        Ok(())
    }

    fn on_local_change(&self, callback: Box<dyn Fn(ClipboardContent) + Send + Sync>) -> Result<()> {
        self.callbacks.lock().unwrap().push(callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let cb = MockClipboard::new();
        assert_eq!(cb.read().unwrap(), ClipboardContent::Empty);
        cb.write_local(ClipboardContent::Text("hello".into())).unwrap();
        assert_eq!(cb.read().unwrap(), ClipboardContent::Text("hello".into()));
    }

    #[test]
    fn image_read_write_round_trip() {
        let cb = MockClipboard::new();
        let img = ClipboardContent::Image { mime: "image/png".into(), width: 2, height: 2, bytes: vec![1, 2, 3] };
        cb.write_local(img.clone()).unwrap();
        assert_eq!(cb.read().unwrap(), img);
    }

    #[test]
    fn local_change_callback_fires_on_simulated_copy() {
        let cb = MockClipboard::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        cb.on_local_change(Box::new(move |c| { r.lock().unwrap().push(c); })).unwrap();
        cb.simulate_copy(ClipboardContent::Text("test".into()));
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
