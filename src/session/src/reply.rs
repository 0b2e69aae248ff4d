//! Reply slots carved out of a shared buffer the renderer writes into.
use std::sync::Arc;

use cs::Stream;
use ipc::{BufferObject, Renderer};
use protocol::{Command, CommandFlags, CommandStreamDescription, SeekReplyCommandStream, SetReplyCommandStream};

use crate::Error;

/// Where one call's reply lands. Holds a reference to the reply buffer.
#[derive(Debug, Clone)]
pub struct ReplySlot {
    bo: Arc<BufferObject>,
    offset: usize,
    size: usize,
}

impl ReplySlot {
    #[inline]
    pub fn bo(&self) -> &Arc<BufferObject> {
        &self.bo
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Size of a new reply buffer holding at least `request` bytes.
fn grow_size(cur: usize, request: usize, min: usize) -> Option<usize> {
    let mut size = cur.max(min);
    if size == 0 {
        return None;
    }
    while size < request {
        size = size.checked_mul(2)?;
    }
    Some(size)
}

/// The session's reply buffer and the bump allocator over it.
///
/// Only touched with the session lock held.
#[derive(Debug)]
pub struct ReplyStream {
    min_size: usize,
    bo: Option<Arc<BufferObject>>,
    size: usize,
    used: usize,
    /// Whether the renderer has been told about `bo`.
    announced: bool,
}

impl ReplyStream {
    pub fn new(min_size: usize) -> Self {
        ReplyStream {
            min_size,
            bo: None,
            size: 0,
            used: 0,
            announced: false,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn bo(&self) -> Option<&Arc<BufferObject>> {
        self.bo.as_ref()
    }

    fn grow(&mut self, renderer: &dyn Renderer, request: usize) -> Result<(), Error> {
        let size = grow_size(self.size, request, self.min_size).ok_or(Error::TooLarge(request))?;

        let bo = renderer.create_buffer(size).map_err(|e| {
            tracing::warn!(size, error = %e, "failed to create reply buffer");
            Error::OutOfHostMemory
        })?;
        bo.map().map_err(|e| {
            tracing::warn!(size, error = %e, "failed to map reply buffer");
            Error::OutOfHostMemory
        })?;

        tracing::debug!(res_id = bo.res_id(), size, "reply buffer grown");
        self.bo = Some(bo);
        self.size = size;
        self.used = 0;
        self.announced = false;
        Ok(())
    }

    /// Reserve `size` bytes for one reply.
    ///
    /// The buffer is replaced by a larger one when the request does not fit.
    /// A `SetReplyCommandStream` for a new buffer and a
    /// `SeekReplyCommandStream` to the slot are encoded into `cs`.
    pub fn alloc_locked(
        &mut self,
        renderer: &dyn Renderer,
        cs: &mut Stream<'_>,
        size: usize,
    ) -> Result<ReplySlot, Error> {
        let fits = match self.used.checked_add(size) {
            Some(end) => self.bo.is_some() && end <= self.size,
            None => false,
        };
        if !fits {
            self.grow(renderer, size)?;
        }

        let bo = match &self.bo {
            Some(bo) => Arc::clone(bo),
            None => return Err(Error::OutOfHostMemory),
        };

        if !self.announced {
            let set = SetReplyCommandStream {
                stream: CommandStreamDescription {
                    resource_id: bo.res_id(),
                    offset: 0,
                    size: self.size as u64,
                },
            };
            cs.reserve_out(set.sizeof())?;
            set.encode(cs, CommandFlags::empty());
            self.announced = true;
        }

        let offset = self.used;
        let seek = SeekReplyCommandStream {
            position: offset as u64,
        };
        cs.reserve_out(seek.sizeof())?;
        seek.encode(cs, CommandFlags::empty());

        self.used += size;
        Ok(ReplySlot { bo, offset, size })
    }
}
