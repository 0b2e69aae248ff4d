//! Shared-memory buffer objects.
use std::ptr;

use memfd::{Memfd, MemfdOptions};
use memmap2::{MmapOptions, MmapRaw};
use uuid::Uuid;

use crate::Error;

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_to_page_size(bytes: usize) -> Option<usize> {
    let ps = page_size();
    Some(bytes.checked_add(ps - 1)? / ps * ps)
}

/// A memfd-backed buffer visible to both peers under its resource id.
///
/// The mapping is created on first use. Buffer objects are shared with
/// `Arc`; the last reference unmaps and closes the memfd.
#[derive(Debug)]
pub struct BufferObject {
    res_id: u32,
    size: usize,
    memfd: Memfd,
    mmap: spin::Mutex<Option<MmapRaw>>,
}

impl BufferObject {
    pub(crate) fn new(res_id: u32, size: usize) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::InvalidSize(size));
        }
        let nbytes = round_to_page_size(size).ok_or(Error::InvalidSize(size))?;

        let opts = MemfdOptions::default()
            .allow_sealing(true)
            .close_on_exec(false);
        let name = format!("vn-bo-{}", Uuid::new_v4());
        let memfd = opts.create(name)?;
        memfd.as_file().set_len(nbytes as u64)?;

        Ok(BufferObject {
            res_id,
            size,
            memfd,
            mmap: spin::Mutex::new(None),
        })
    }

    #[inline]
    pub fn res_id(&self) -> u32 {
        self.res_id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn memfd(&self) -> &Memfd {
        &self.memfd
    }

    /// Map the buffer. Later calls return the same address.
    pub fn map(&self) -> Result<*mut u8, Error> {
        let mut guard = self.mmap.lock();
        if let Some(mmap) = guard.as_ref() {
            return Ok(mmap.as_mut_ptr());
        }

        let mmap = MmapOptions::new()
            .len(self.size)
            .map_raw(self.memfd.as_file())?;
        let addr = mmap.as_mut_ptr();
        *guard = Some(mmap);
        Ok(addr)
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), Error> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::OutOfRange {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Copy `src` into the buffer at `offset`.
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), Error> {
        self.check_range(offset, src.len())?;
        let base = self.map()?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len()) };
        Ok(())
    }

    /// Copy `dst.len()` bytes at `offset` out of the buffer.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), Error> {
        self.check_range(offset, dst.len())?;
        let base = self.map()?;
        unsafe { ptr::copy_nonoverlapping(base.add(offset), dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// Borrow `len` bytes at `offset` directly from the mapping.
    ///
    /// # Safety
    ///
    /// Nobody may write to the range while the slice is alive.
    pub unsafe fn as_slice(&self, offset: usize, len: usize) -> Result<&[u8], Error> {
        self.check_range(offset, len)?;
        let base = self.map()?;
        Ok(std::slice::from_raw_parts(base.add(offset), len))
    }
}
