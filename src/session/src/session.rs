use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cs::{AllocPolicy, Stream};
use ipc::{BufferObject, Renderer, Submit, SyncObject, SyncPoint, Wait};
use protocol::{Command, CommandFlags, GetVersion, MIN_PROTOCOL_VERSION};

use crate::config::SessionConfig;
use crate::reply::ReplyStream;
use crate::Error;

/// Issues commands to a renderer.
pub trait Dispatch {
    /// Run `cmd` and wait for its reply. Output arguments held by `cmd` are
    /// filled in from the reply.
    fn call<C: Command>(&self, cmd: &mut C) -> Result<C::Reply, Error>;

    /// Queue `cmd` without a reply. Failures are not reported; output
    /// arguments are left untouched.
    fn send<C: Command>(&self, cmd: &C);
}

struct Locked {
    cs: Stream<'static>,
    reply: ReplyStream,
    sync_point: u64,
}

/// A connection to one renderer.
///
/// Commands from all threads go through one command stream. The lock over
/// it is held from reply slot allocation to submission, never across the
/// wait for a reply.
pub struct Session {
    renderer: Arc<dyn Renderer>,
    inner: Mutex<Locked>,
    reply_sync: Arc<SyncObject>,
    wait_timeout: Option<Duration>,
    lost: AtomicBool,
    renderer_version: u32,
}

impl Session {
    /// Connect to `renderer` and check that it speaks a supported protocol
    /// version.
    pub fn new(renderer: Arc<dyn Renderer>, config: &SessionConfig) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let reply_sync = renderer.create_sync(0)?;
        let policy = match config.max_stream_size {
            Some(bytes) => AllocPolicy::Bounded(bytes),
            None => AllocPolicy::System,
        };

        let mut session = Session {
            renderer,
            inner: Mutex::new(Locked {
                cs: Stream::new(policy, config.min_chunk_size),
                reply: ReplyStream::new(config.reply_min_size),
                sync_point: 0,
            }),
            reply_sync,
            wait_timeout: config.wait_timeout_ms.map(Duration::from_millis),
            lost: AtomicBool::new(false),
            renderer_version: 0,
        };

        let version = session.call(&mut GetVersion)?;
        if version < MIN_PROTOCOL_VERSION {
            tracing::error!(version, "incompatible renderer");
            return Err(Error::IncompatibleRenderer {
                found: version,
                required: MIN_PROTOCOL_VERSION,
            });
        }
        session.renderer_version = version;

        tracing::info!(version, "session established");
        Ok(session)
    }

    #[inline]
    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    /// Protocol version reported by the renderer.
    #[inline]
    pub fn renderer_version(&self) -> u32 {
        self.renderer_version
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Current size of the reply buffer, 0 before the first call.
    pub fn reply_buffer_size(&self) -> usize {
        self.lock().reply.size()
    }

    fn lock(&self) -> MutexGuard<'_, Locked> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_lost(&self, reason: &str) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            tracing::error!(reason, "session lost");
        }
    }

    fn submit_locked(
        &self,
        locked: &mut Locked,
        reply_bo: Option<&Arc<BufferObject>>,
    ) -> Result<u64, Error> {
        locked.cs.end_out();
        locked.sync_point += 1;
        let point = SyncPoint {
            sync: Arc::clone(&self.reply_sync),
            value: locked.sync_point,
        };
        let bos: Vec<Arc<BufferObject>> = reply_bo.into_iter().cloned().collect();

        let res = {
            let chunks: Vec<&[u8]> = locked.cs.out_chunks().collect();
            tracing::trace!(len = locked.cs.out_len(), chunks = chunks.len(), "submit");
            self.renderer.submit(&Submit {
                chunks: &chunks,
                bos: &bos,
                syncs: std::slice::from_ref(&point),
            })
        };
        locked.cs.reset();

        if let Err(e) = res {
            self.mark_lost("submission failed");
            return Err(e.into());
        }
        Ok(point.value)
    }

    /// Take the session lock, failing fast on a lost session.
    fn lock_live(&self) -> Result<MutexGuard<'_, Locked>, Error> {
        if self.is_lost() {
            return Err(Error::DeviceLost);
        }
        Ok(self.lock())
    }

    /// Encode `cmd` with `flags` and submit it. Shared by calls and sends.
    fn encode_and_submit_locked<C: Command>(
        &self,
        locked: &mut Locked,
        cmd: &C,
        flags: CommandFlags,
        reply_bo: Option<&Arc<BufferObject>>,
    ) -> Result<u64, Error> {
        locked.cs.reserve_out(cmd.sizeof())?;
        cmd.encode(&mut locked.cs, flags);
        self.submit_locked(locked, reply_bo)
    }

    fn wait(&self, point: u64) -> Result<(), Error> {
        let point = SyncPoint {
            sync: Arc::clone(&self.reply_sync),
            value: point,
        };
        let wait = Wait {
            syncs: std::slice::from_ref(&point),
            wait_any: false,
            timeout: self.wait_timeout,
        };

        match self.renderer.wait(&wait) {
            Ok(()) => Ok(()),
            Err(ipc::Error::Timeout) => {
                self.mark_lost("reply wait timed out");
                Err(Error::Timeout)
            }
            Err(ipc::Error::Lost) => {
                self.mark_lost("renderer lost");
                Err(Error::DeviceLost)
            }
            Err(e) => {
                self.mark_lost("reply wait failed");
                Err(e.into())
            }
        }
    }
}

impl Dispatch for Session {
    fn call<C: Command>(&self, cmd: &mut C) -> Result<C::Reply, Error> {
        let (slot, point) = {
            let mut guard = self.lock_live()?;
            let locked = &mut *guard;
            let slot = locked
                .reply
                .alloc_locked(&*self.renderer, &mut locked.cs, cmd.sizeof_reply())?;
            let point = self.encode_and_submit_locked(
                locked,
                cmd,
                CommandFlags::GENERATE_REPLY,
                Some(slot.bo()),
            )?;
            (slot, point)
        };

        // the lock is released before waiting
        self.wait(point)?;

        // SAFETY: the renderer is done with the slot once the sync point is
        // reached, and no other slot overlaps it.
        let data = unsafe { slot.bo().as_slice(slot.offset(), slot.size()) }?;
        let mut cs = Stream::new(AllocPolicy::System, slot.size().max(1));
        cs.reserve_in(slot.size());
        cs.set_in_data(data);

        let reply = cmd.decode_reply(&mut cs);
        if cs.has_error() {
            self.mark_lost("malformed reply");
            return Err(Error::DeviceLost);
        }
        Ok(reply)
    }

    fn send<C: Command>(&self, cmd: &C) {
        let res = self.lock_live().and_then(|mut guard| {
            self.encode_and_submit_locked(&mut guard, cmd, CommandFlags::empty(), None)
        });
        if let Err(e) = res {
            tracing::warn!(ty = ?C::TYPE, error = %e, "dropped command");
        }
    }
}
