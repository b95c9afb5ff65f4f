//! Runtime resources referenced by listeners.

use tokio::runtime::Handle;

/// Named I/O worker: the runtime a listener's accept loop runs on.
#[derive(Debug, Clone)]
pub struct Worker {
    name: String,
    handle: Handle,
}

impl Worker {
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Worker on the runtime of the calling task.
    pub fn current(name: impl Into<String>) -> Self {
        Self::new(name, Handle::current())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Named buffer sizing shared by listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPool {
    name: String,
    buffer_size: usize,
}

impl BufferPool {
    pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

    pub fn new(name: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            buffer_size: buffer_size.max(8 * 1024),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read buffer size for HTTP/1 connections. hyper rejects anything
    /// below 8 KiB.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new("default", Self::DEFAULT_BUFFER_SIZE)
    }
}
