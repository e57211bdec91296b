//! Bounded in-memory tail of recent log lines.
//!
//! `LogTail` is a `MakeWriter` for a plain-text fmt layer: every formatted
//! event is split into lines and appended to a ring buffer that keeps only
//! the newest `capacity` lines. The admin view reads it through [`LogTail::lines`].

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;

struct TailBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

/// Shared ring buffer of log lines. Cheap to clone (Arc).
#[derive(Clone)]
pub struct LogTail {
    inner: Arc<Mutex<TailBuffer>>,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TailBuffer {
                lines: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, line: &str) {
        if let Ok(mut buf) = self.inner.lock() {
            if buf.capacity == 0 {
                return;
            }
            while buf.lines.len() >= buf.capacity {
                buf.lines.pop_front();
            }
            buf.lines.push_back(line.to_string());
        }
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|buf| buf.lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|buf| buf.lines.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-event writer handed out by [`LogTail`]. Lines are committed on flush or drop.
pub struct TailWriter {
    tail: LogTail,
    pending: Vec<u8>,
}

impl TailWriter {
    fn commit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.tail.push(line);
        }
        self.pending.clear();
    }
}

impl io::Write for TailWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl Drop for TailWriter {
    fn drop(&mut self) {
        self.commit();
    }
}

impl<'a> MakeWriter<'a> for LogTail {
    type Writer = TailWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TailWriter {
            tail: self.clone(),
            pending: Vec::new(),
        }
    }
}
