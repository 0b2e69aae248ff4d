//! An in-process renderer.
//!
//! A peer thread executes submitted command streams in order. Replies land
//! in the buffer named by the last `SetReplyCommandStream`, at the position
//! set by the last `SeekReplyCommandStream`.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use minstant::Instant;

use cs::{AllocPolicy, ObjectId, Stream};
use protocol::{
    peek_command_type, CommandFlags, CommandStreamDescription, CommandType, Reply, Request, Status,
    PROTOCOL_VERSION,
};

use crate::{BufferObject, Error, Renderer, RendererInfo, Submit, SyncObject, SyncPoint, Wait};

/// Largest buffer object the loopback renderer creates.
pub const MAX_BUFFER_SIZE: usize = 1 << 30;

/// Largest object a device may create.
const MAX_OBJECT_SIZE: u64 = 16 << 20;

const WAIT_ANY_POLL_INTERVAL: Duration = Duration::from_millis(1);

enum Message {
    Submit {
        cs: Vec<u8>,
        // held until the batch has executed
        _bos: Vec<Arc<BufferObject>>,
        syncs: Vec<SyncPoint>,
    },
    Shutdown,
}

#[derive(Debug, Default)]
struct Shared {
    next_res_id: AtomicU32,
    next_sync_id: AtomicU32,
    resources: spin::Mutex<HashMap<u32, Weak<BufferObject>>>,
    syncs: spin::Mutex<Vec<Weak<SyncObject>>>,
    lost: AtomicBool,
}

impl Shared {
    #[inline]
    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn mark_lost(&self, err: &Error) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            tracing::error!(%err, "loopback renderer lost");
        }
        let mut syncs = self.syncs.lock();
        syncs.retain(|sync| sync.strong_count() > 0);
        for sync in syncs.iter().filter_map(Weak::upgrade) {
            sync.mark_lost();
        }
    }

    fn lookup(&self, res_id: u32) -> Result<Arc<BufferObject>, Error> {
        self.resources
            .lock()
            .get(&res_id)
            .and_then(Weak::upgrade)
            .ok_or(Error::UnknownResource(res_id))
    }
}

/// A renderer whose peer runs on a thread of this process.
pub struct LoopbackRenderer {
    info: RendererInfo,
    shared: Arc<Shared>,
    tx: Sender<Message>,
    peer: Option<JoinHandle<()>>,
}

impl LoopbackRenderer {
    pub fn new() -> Result<Self, Error> {
        Self::with_version(PROTOCOL_VERSION)
    }

    /// A renderer that reports `protocol_version` to `GetVersion`.
    pub fn with_version(protocol_version: u32) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            next_res_id: AtomicU32::new(1),
            next_sync_id: AtomicU32::new(1),
            ..Default::default()
        });
        let (tx, rx) = channel::unbounded();

        let peer = Peer::new(Arc::clone(&shared), protocol_version);
        let handle = thread::Builder::new()
            .name("loopback-peer".to_owned())
            .spawn(move || peer.run(rx))?;

        Ok(LoopbackRenderer {
            info: RendererInfo {
                protocol_version,
                max_buffer_size: MAX_BUFFER_SIZE,
            },
            shared,
            tx,
            peer: Some(handle),
        })
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }
}

impl Drop for LoopbackRenderer {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.peer.take() {
            if handle.join().is_err() {
                tracing::error!("loopback peer panicked");
            }
        }
    }
}

impl Renderer for LoopbackRenderer {
    fn info(&self) -> &RendererInfo {
        &self.info
    }

    fn create_buffer(&self, size: usize) -> Result<Arc<BufferObject>, Error> {
        if size > self.info.max_buffer_size {
            return Err(Error::InvalidSize(size));
        }
        let res_id = self.shared.next_res_id.fetch_add(1, Ordering::Relaxed);
        let bo = Arc::new(BufferObject::new(res_id, size)?);

        let mut resources = self.shared.resources.lock();
        resources.retain(|_, bo| bo.strong_count() > 0);
        resources.insert(res_id, Arc::downgrade(&bo));
        tracing::debug!(res_id, size, "created buffer object");
        Ok(bo)
    }

    fn create_sync(&self, initial: u64) -> Result<Arc<SyncObject>, Error> {
        let id = self.shared.next_sync_id.fetch_add(1, Ordering::Relaxed);
        let sync = Arc::new(SyncObject::new(id, initial));
        if self.shared.is_lost() {
            sync.mark_lost();
        }
        self.shared.syncs.lock().push(Arc::downgrade(&sync));
        Ok(sync)
    }

    fn submit(&self, submit: &Submit<'_>) -> Result<(), Error> {
        if self.shared.is_lost() {
            return Err(Error::Lost);
        }

        let msg = Message::Submit {
            cs: submit.chunks.concat(),
            _bos: submit.bos.to_vec(),
            syncs: submit.syncs.to_vec(),
        };
        self.tx.send(msg).map_err(|_| Error::Disconnected)
    }

    fn wait(&self, wait: &Wait<'_>) -> Result<(), Error> {
        if self.shared.is_lost() {
            return Err(Error::Lost);
        }

        let deadline = wait.timeout.map(|t| Instant::now() + t);
        let remaining = || {
            deadline.map(|d| {
                let now = Instant::now();
                if now >= d {
                    Duration::ZERO
                } else {
                    d - now
                }
            })
        };

        if !wait.wait_any {
            for point in wait.syncs {
                point.sync.wait_until(point.value, remaining())?;
            }
            return Ok(());
        }

        let Some(first) = wait.syncs.first() else {
            return Ok(());
        };
        loop {
            if wait.syncs.iter().any(|p| p.sync.read() >= p.value) {
                return Ok(());
            }
            let slice = match remaining() {
                Some(left) if left.is_zero() => return Err(Error::Timeout),
                Some(left) => left.min(WAIT_ANY_POLL_INTERVAL),
                None => WAIT_ANY_POLL_INTERVAL,
            };
            match first.sync.wait_until(first.value, Some(slice)) {
                Ok(()) => return Ok(()),
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug)]
struct ReplyTarget {
    bo: Arc<BufferObject>,
    offset: usize,
    size: usize,
}

#[derive(Debug)]
struct ObjectState {
    device: ObjectId,
    data: Vec<u8>,
}

struct Peer {
    shared: Arc<Shared>,
    version: u32,
    reply: Option<ReplyTarget>,
    position: usize,
    next_id: ObjectId,
    devices: HashMap<ObjectId, String>,
    objects: HashMap<ObjectId, ObjectState>,
}

fn to_usize(val: u64) -> Result<usize, Error> {
    usize::try_from(val).map_err(|_| Error::Malformed("size does not fit the host"))
}

impl Peer {
    fn new(shared: Arc<Shared>, version: u32) -> Self {
        Peer {
            shared,
            version,
            reply: None,
            position: 0,
            next_id: 1,
            devices: HashMap::new(),
            objects: HashMap::new(),
        }
    }

    fn run(mut self, rx: Receiver<Message>) {
        for msg in rx.iter() {
            match msg {
                Message::Submit { cs, _bos, syncs } => {
                    if self.shared.is_lost() {
                        continue;
                    }
                    if let Err(e) = self.execute(&cs) {
                        self.shared.mark_lost(&e);
                        continue;
                    }
                    for point in &syncs {
                        point.sync.signal(point.value);
                    }
                }
                Message::Shutdown => break,
            }
        }
        tracing::debug!("loopback peer exited");
    }

    fn execute(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let mut cs = Stream::new(AllocPolicy::System, 1);
        cs.set_in_data(bytes);

        while cs.in_remaining() > 0 {
            let ty = CommandType::try_from(peek_command_type(&mut cs))?;
            if cs.has_error() {
                return Err(Error::Malformed("truncated command header"));
            }
            tracing::trace!(?ty, offset = bytes.len() - cs.in_remaining(), "next command");

            let (flags, request) = Request::decode(&mut cs)?;
            if cs.has_error() {
                return Err(Error::Malformed("truncated command"));
            }

            let ty = request.command_type();
            tracing::trace!(?ty, ?flags, "execute command");
            let reply = self.dispatch(request)?;
            if flags.contains(CommandFlags::GENERATE_REPLY) {
                self.write_reply(ty, &reply)?;
            }
        }
        Ok(())
    }

    fn alloc_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn object(&mut self, device: ObjectId, object: ObjectId) -> Option<&mut ObjectState> {
        self.objects.get_mut(&object).filter(|o| o.device == device)
    }

    fn dispatch(&mut self, request: Request) -> Result<Reply, Error> {
        let reply = match request {
            Request::GetVersion => Reply::Version(self.version),
            Request::CreateDevice { name } => {
                let id = self.alloc_id();
                tracing::debug!(id, %name, "created device");
                self.devices.insert(id, name);
                Reply::Created(Status::SUCCESS, id)
            }
            Request::DestroyDevice { device } => {
                self.devices.remove(&device);
                self.objects.retain(|_, o| o.device != device);
                Reply::Void
            }
            Request::CreateObject { device, info } => match info {
                _ if !self.devices.contains_key(&device) => {
                    Reply::Created(Status::ERROR_INVALID_HANDLE, 0)
                }
                None => Reply::Created(Status::ERROR_INITIALIZATION_FAILED, 0),
                Some(info) if info.size > MAX_OBJECT_SIZE => {
                    Reply::Created(Status::ERROR_OUT_OF_DEVICE_MEMORY, 0)
                }
                Some(info) => {
                    let id = self.alloc_id();
                    let data = vec![0u8; info.size as usize];
                    self.objects.insert(id, ObjectState { device, data });
                    Reply::Created(Status::SUCCESS, id)
                }
            },
            Request::DestroyObject { device, object } => {
                if self.object(device, object).is_some() {
                    self.objects.remove(&object);
                }
                Reply::Void
            }
            Request::WriteObject {
                device,
                object,
                offset,
                data,
            } => match self.object(device, object) {
                None => Reply::Status(Status::ERROR_INVALID_HANDLE),
                Some(state) => {
                    let range = usize::try_from(offset)
                        .ok()
                        .and_then(|start| Some(start..start.checked_add(data.len())?))
                        .filter(|range| range.end <= state.data.len());
                    match range {
                        Some(range) => {
                            state.data[range].copy_from_slice(&data);
                            Reply::Status(Status::SUCCESS)
                        }
                        None => Reply::Status(Status::ERROR_OUT_OF_RANGE),
                    }
                }
            },
            Request::ReadObject {
                device,
                object,
                offset,
                size,
            } => match self.object(device, object) {
                None => Reply::Data(Status::ERROR_INVALID_HANDLE, Vec::new()),
                Some(state) => match usize::try_from(offset) {
                    Ok(start) if start <= state.data.len() => {
                        let avail = state.data.len() - start;
                        let len = usize::try_from(size).unwrap_or(usize::MAX).min(avail);
                        Reply::Data(Status::SUCCESS, state.data[start..start + len].to_vec())
                    }
                    _ => Reply::Data(Status::ERROR_OUT_OF_RANGE, Vec::new()),
                },
            },
            Request::SetReplyCommandStream(desc) => {
                self.set_reply_stream(desc)?;
                Reply::Void
            }
            Request::SeekReplyCommandStream { position } => {
                self.position = to_usize(position)?;
                Reply::Void
            }
        };
        Ok(reply)
    }

    fn set_reply_stream(&mut self, desc: Option<CommandStreamDescription>) -> Result<(), Error> {
        let Some(desc) = desc else {
            self.reply = None;
            self.position = 0;
            return Ok(());
        };

        let bo = self.shared.lookup(desc.resource_id)?;
        let offset = to_usize(desc.offset)?;
        let size = to_usize(desc.size)?;
        match offset.checked_add(size) {
            Some(end) if end <= bo.size() => {}
            _ => {
                return Err(Error::OutOfRange {
                    offset,
                    len: size,
                    size: bo.size(),
                })
            }
        }

        tracing::debug!(res_id = desc.resource_id, offset, size, "reply stream set");
        self.reply = Some(ReplyTarget { bo, offset, size });
        self.position = 0;
        Ok(())
    }

    fn write_reply(&mut self, ty: CommandType, reply: &Reply) -> Result<(), Error> {
        let target = self
            .reply
            .as_ref()
            .ok_or(Error::Malformed("reply requested without a reply stream"))?;

        let len = reply.sizeof();
        let end = match self.position.checked_add(len) {
            Some(end) if end <= target.size => end,
            _ => {
                return Err(Error::OutOfRange {
                    offset: self.position,
                    len,
                    size: target.size,
                })
            }
        };

        let mut cs = Stream::new(AllocPolicy::System, len);
        cs.reserve_out(len)
            .map_err(|_| Error::Malformed("reply does not fit in memory"))?;
        reply.encode(&mut cs, ty);
        cs.end_out();

        let mut offset = target.offset + self.position;
        for chunk in cs.out_chunks() {
            target.bo.write(offset, chunk)?;
            offset += chunk.len();
        }
        self.position = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs::Encode;
    use protocol::{Command, GetVersion, SeekReplyCommandStream, SetReplyCommandStream};

    fn encode_batch(f: impl FnOnce(&mut Stream<'_>)) -> Vec<u8> {
        let mut cs = Stream::new(AllocPolicy::System, 256);
        f(&mut cs);
        cs.end_out();
        cs.out_chunks().flatten().copied().collect()
    }

    fn send<C: Command>(cs: &mut Stream<'_>, cmd: &C, flags: CommandFlags) {
        cs.reserve_out(cmd.sizeof()).unwrap();
        cmd.encode(cs, flags);
    }

    fn submit(renderer: &LoopbackRenderer, bytes: &[u8], bos: &[Arc<BufferObject>], point: &SyncPoint) {
        renderer
            .submit(&Submit {
                chunks: &[bytes],
                bos,
                syncs: std::slice::from_ref(point),
            })
            .unwrap();
    }

    #[test]
    fn reply_lands_at_seek_position() {
        let renderer = LoopbackRenderer::with_version(7).unwrap();
        let bo = renderer.create_buffer(64).unwrap();
        let sync = renderer.create_sync(0).unwrap();

        let bytes = encode_batch(|cs| {
            let set = SetReplyCommandStream {
                stream: CommandStreamDescription {
                    resource_id: bo.res_id(),
                    offset: 0,
                    size: 64,
                },
            };
            send(cs, &set, CommandFlags::empty());
            send(cs, &SeekReplyCommandStream { position: 16 }, CommandFlags::empty());
            send(cs, &GetVersion, CommandFlags::GENERATE_REPLY);
        });
        let point = SyncPoint { sync, value: 1 };
        submit(&renderer, &bytes, &[Arc::clone(&bo)], &point);
        renderer
            .wait(&Wait {
                syncs: std::slice::from_ref(&point),
                wait_any: false,
                timeout: Some(Duration::from_secs(5)),
            })
            .unwrap();

        let mut reply = [0u8; 8];
        bo.read(16, &mut reply).unwrap();
        let mut cs = Stream::new(AllocPolicy::System, 1);
        cs.set_in_data(&reply);
        assert_eq!(GetVersion.decode_reply(&mut cs), 7);
        assert!(!cs.has_error());
    }

    #[test]
    fn malformed_stream_loses_renderer() {
        let renderer = LoopbackRenderer::new().unwrap();
        let sync = renderer.create_sync(0).unwrap();

        // a reply without a reply stream
        let bytes = encode_batch(|cs| send(cs, &GetVersion, CommandFlags::GENERATE_REPLY));
        let point = SyncPoint { sync, value: 1 };
        submit(&renderer, &bytes, &[], &point);

        let res = point.sync.wait_until(1, Some(Duration::from_secs(5)));
        assert!(matches!(res, Err(Error::Lost)));
        assert!(renderer.is_lost());
        assert!(matches!(
            renderer.submit(&Submit {
                chunks: &[],
                bos: &[],
                syncs: &[],
            }),
            Err(Error::Lost)
        ));
    }

    #[test]
    fn unknown_resource_loses_renderer() {
        let renderer = LoopbackRenderer::new().unwrap();
        let sync = renderer.create_sync(0).unwrap();

        let bytes = encode_batch(|cs| {
            let set = SetReplyCommandStream {
                stream: CommandStreamDescription {
                    resource_id: 999,
                    offset: 0,
                    size: 64,
                },
            };
            send(cs, &set, CommandFlags::empty());
        });
        let point = SyncPoint { sync, value: 1 };
        submit(&renderer, &bytes, &[], &point);
        assert!(point.sync.wait_until(1, Some(Duration::from_secs(5))).is_err());
        assert!(renderer.is_lost());
    }

    #[test]
    fn trailing_garbage_is_malformed() {
        let renderer = LoopbackRenderer::new().unwrap();
        let sync = renderer.create_sync(0).unwrap();

        let mut bytes = encode_batch(|cs| {
            send(cs, &SeekReplyCommandStream { position: 0 }, CommandFlags::empty())
        });
        // header of a seek with its argument cut short
        bytes.extend_from_slice(&encode_batch(|cs| {
            cs.reserve_out(12).unwrap();
            (CommandType::SeekReplyCommandStream as i32).encode(cs);
            0u32.encode(cs);
            0u32.encode(cs);
        }));
        let point = SyncPoint { sync, value: 1 };
        submit(&renderer, &bytes, &[], &point);
        assert!(point.sync.wait_until(1, Some(Duration::from_secs(5))).is_err());
        assert!(renderer.is_lost());
    }

    #[test]
    fn unknown_command_loses_renderer() {
        let renderer = LoopbackRenderer::new().unwrap();
        let sync = renderer.create_sync(0).unwrap();

        let bytes = encode_batch(|cs| {
            cs.reserve_out(8).unwrap();
            1234i32.encode(cs);
            0u32.encode(cs);
        });
        let point = SyncPoint { sync, value: 1 };
        submit(&renderer, &bytes, &[], &point);
        assert!(matches!(
            point.sync.wait_until(1, Some(Duration::from_secs(5))),
            Err(Error::Lost)
        ));
        assert!(renderer.is_lost());
    }

    #[test]
    fn wait_any() {
        let renderer = LoopbackRenderer::new().unwrap();
        let done = renderer.create_sync(3).unwrap();
        let pending = renderer.create_sync(0).unwrap();
        let points = [
            SyncPoint {
                sync: pending,
                value: 1,
            },
            SyncPoint {
                sync: done,
                value: 3,
            },
        ];

        let any = Wait {
            syncs: &points,
            wait_any: true,
            timeout: Some(Duration::from_millis(50)),
        };
        renderer.wait(&any).unwrap();

        let all = Wait {
            syncs: &points,
            wait_any: false,
            timeout: Some(Duration::from_millis(10)),
        };
        assert!(matches!(renderer.wait(&all), Err(Error::Timeout)));
    }
}
