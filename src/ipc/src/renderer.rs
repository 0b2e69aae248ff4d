use std::sync::Arc;
use std::time::Duration;

use crate::{BufferObject, Error, SyncObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererInfo {
    /// Protocol version the renderer speaks.
    pub protocol_version: u32,
    pub max_buffer_size: usize,
}

/// A timeline point to signal or wait for.
#[derive(Debug, Clone)]
pub struct SyncPoint {
    pub sync: Arc<SyncObject>,
    pub value: u64,
}

/// One batch of commands.
#[derive(Debug)]
pub struct Submit<'a> {
    /// Command stream chunks, executed back to back.
    pub chunks: &'a [&'a [u8]],
    /// Buffers the commands refer to, kept alive until executed.
    pub bos: &'a [Arc<BufferObject>],
    /// Signaled once every command has executed.
    pub syncs: &'a [SyncPoint],
}

#[derive(Debug)]
pub struct Wait<'a> {
    pub syncs: &'a [SyncPoint],
    /// Return once any point is reached instead of all of them.
    pub wait_any: bool,
    pub timeout: Option<Duration>,
}

/// The transport a session drives.
pub trait Renderer: Send + Sync {
    fn info(&self) -> &RendererInfo;

    fn create_buffer(&self, size: usize) -> Result<Arc<BufferObject>, Error>;

    fn create_sync(&self, initial: u64) -> Result<Arc<SyncObject>, Error>;

    /// Queue a batch for execution. Batches execute in submission order.
    fn submit(&self, submit: &Submit<'_>) -> Result<(), Error>;

    fn wait(&self, wait: &Wait<'_>) -> Result<(), Error>;
}
