#![allow(dead_code)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cs::codec::sizeof_blob;
use cs::{AllocPolicy, Stream};
use ipc::{BufferObject, LoopbackRenderer, Renderer, RendererInfo, Submit, SyncObject, Wait};
use protocol::{CommandFlags, Request, PROTOCOL_VERSION};
use session::{Session, SessionConfig};

/// Faults a [`Recorder`] injects.
#[derive(Debug, Default)]
pub struct Faults {
    pub fail_buffers: AtomicBool,
    /// Swallow submissions instead of executing them.
    pub stall: AtomicBool,
    /// Overwrite the reply buffer after every wait.
    pub corrupt_replies: AtomicBool,
}

/// A loopback renderer that records every submission.
pub struct Recorder {
    inner: LoopbackRenderer,
    pub faults: Faults,
    submits: Mutex<Vec<Vec<Vec<u8>>>>,
    buffers_created: AtomicUsize,
    last_bo: Mutex<Option<Arc<BufferObject>>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Self::with_version(PROTOCOL_VERSION)
    }

    pub fn with_version(version: u32) -> Arc<Self> {
        Arc::new(Recorder {
            inner: LoopbackRenderer::with_version(version).unwrap(),
            faults: Faults::default(),
            submits: Mutex::new(Vec::new()),
            buffers_created: AtomicUsize::new(0),
            last_bo: Mutex::new(None),
        })
    }

    /// Chunks of every submission, in submission order.
    pub fn submits(&self) -> Vec<Vec<Vec<u8>>> {
        self.submits.lock().unwrap().clone()
    }

    /// Commands of every submission, in submission order.
    pub fn batches(&self) -> Vec<Vec<(CommandFlags, Request)>> {
        self.submits()
            .iter()
            .map(|chunks| decode_requests(&chunks.concat()))
            .collect()
    }

    pub fn requests(&self) -> Vec<(CommandFlags, Request)> {
        self.batches().into_iter().flatten().collect()
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::Relaxed)
    }
}

pub fn decode_requests(bytes: &[u8]) -> Vec<(CommandFlags, Request)> {
    let mut cs = Stream::new(AllocPolicy::System, 1);
    cs.set_in_data(bytes);

    let mut requests = Vec::new();
    while cs.in_remaining() > 0 {
        requests.push(Request::decode(&mut cs).unwrap());
        assert!(!cs.has_error());
    }
    requests
}

/// Size of the reply the peer writes for `request`.
pub fn reply_size(request: &Request) -> usize {
    match request {
        Request::GetVersion => 8,
        Request::CreateDevice { .. } | Request::CreateObject { .. } => 16,
        Request::WriteObject { .. } => 8,
        Request::ReadObject { size, .. } => 16 + sizeof_blob(*size as usize),
        _ => 4,
    }
}

impl Renderer for Recorder {
    fn info(&self) -> &RendererInfo {
        self.inner.info()
    }

    fn create_buffer(&self, size: usize) -> Result<Arc<BufferObject>, ipc::Error> {
        if self.faults.fail_buffers.load(Ordering::Relaxed) {
            return Err(ipc::Error::InvalidSize(size));
        }
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        self.inner.create_buffer(size)
    }

    fn create_sync(&self, initial: u64) -> Result<Arc<SyncObject>, ipc::Error> {
        self.inner.create_sync(initial)
    }

    fn submit(&self, submit: &Submit<'_>) -> Result<(), ipc::Error> {
        self.submits
            .lock()
            .unwrap()
            .push(submit.chunks.iter().map(|c| c.to_vec()).collect());
        if let Some(bo) = submit.bos.first() {
            *self.last_bo.lock().unwrap() = Some(Arc::clone(bo));
        }

        if self.faults.stall.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.inner.submit(submit)
    }

    fn wait(&self, wait: &Wait<'_>) -> Result<(), ipc::Error> {
        self.inner.wait(wait)?;
        if self.faults.corrupt_replies.load(Ordering::Relaxed) {
            if let Some(bo) = self.last_bo.lock().unwrap().as_ref() {
                bo.write(0, &vec![0xff; bo.size()])?;
            }
        }
        Ok(())
    }
}

pub fn config(toml: &str) -> SessionConfig {
    SessionConfig::new(Some(toml)).unwrap()
}

pub fn setup(config: &SessionConfig) -> (Arc<Recorder>, Session) {
    config.init_log(false).unwrap();
    let recorder = Recorder::new();
    let session = Session::new(recorder.clone(), config).unwrap();
    (recorder, session)
}
