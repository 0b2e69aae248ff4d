//! Byte cursor pair backing the command stream.
use std::fmt;

use crate::Error;

/// Every encoded quantity occupies a multiple of this many bytes on the wire.
pub const WIRE_ALIGN: usize = 4;

static_assertions::const_assert!(WIRE_ALIGN.is_power_of_two());

/// Initial capacity of the chunk list.
const MIN_CHUNK_SLOTS: usize = 4;

/// How a [`Stream`] obtains memory for its output chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocPolicy {
    /// Allocate from the global allocator, failing only when it refuses.
    #[default]
    System,
    /// Refuse any chunk that would push the live chunk bytes past this bound.
    Bounded(usize),
}

struct Chunk {
    buf: Vec<u8>,
    len: usize,
    committed: bool,
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("capacity", &self.buf.len())
            .field("len", &self.len)
            .field("committed", &self.committed)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Input<'a> {
    /// Bytes announced by `reserve_in`, bookkeeping only.
    reserved: usize,
    data: &'a [u8],
    cur: usize,
}

#[derive(Debug)]
struct Output {
    min_chunk_size: usize,
    chunks: Vec<Chunk>,
    last_chunk_size: usize,
    total_len: usize,
    /// Live chunk bytes, checked against the allocation policy.
    allocated: usize,
    /// Cursor and end always refer to the last chunk.
    cur: usize,
    end: usize,
}

impl Output {
    /// Finalize the length of the current chunk.
    fn commit(&mut self) {
        let Some(chunk) = self.chunks.last_mut() else {
            return;
        };
        if chunk.committed {
            return;
        }
        debug_assert!(self.cur <= chunk.buf.len());
        chunk.len = self.cur;
        chunk.committed = true;
        self.total_len += self.cur;
        self.end = self.cur;
    }
}

/// An input cursor over a borrowed reply window and a growable chunked
/// output buffer.
///
/// The error flag is sticky: once a decode runs past its input window, it
/// stays set until the stream is dropped. [`Stream::reset`] does not clear
/// it.
#[derive(Debug)]
pub struct Stream<'a> {
    policy: AllocPolicy,
    error: bool,
    input: Input<'a>,
    output: Output,
}

impl<'a> Stream<'a> {
    /// Create an empty stream. No memory is allocated until the first
    /// [`Stream::reserve_out`].
    pub fn new(policy: AllocPolicy, min_chunk_size: usize) -> Self {
        assert!(min_chunk_size > 0, "minimum chunk size must be non-zero");
        Stream {
            policy,
            error: false,
            input: Input::default(),
            output: Output {
                min_chunk_size,
                chunks: Vec::new(),
                last_chunk_size: 0,
                total_len: 0,
                allocated: 0,
                cur: 0,
                end: 0,
            },
        }
    }

    /// Reset the stream for reuse.
    ///
    /// All output chunks but the last one are freed; the last one is rewound
    /// and becomes the first. The input window is cleared.
    pub fn reset(&mut self) {
        // error is sticky
        self.input = Input::default();

        let out = &mut self.output;
        let Some(mut last) = out.chunks.pop() else {
            return;
        };
        out.chunks.clear();
        last.len = 0;
        last.committed = false;
        out.allocated = last.buf.len();
        out.chunks.push(last);
        out.total_len = 0;
        out.cur = 0;
        out.end = out.last_chunk_size;
    }

    #[inline]
    pub fn set_error(&mut self) {
        if !self.error {
            tracing::debug!("command stream poisoned");
        }
        self.error = true;
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error
    }

    #[inline]
    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Declare that `size` more bytes will be decoded from the next window.
    #[inline]
    pub fn reserve_in(&mut self, size: usize) {
        self.input.reserved += size;
    }

    /// Install a new input window.
    ///
    /// The window must cover every byte announced with
    /// [`Stream::reserve_in`].
    pub fn set_in_data(&mut self, data: &'a [u8]) {
        assert!(
            data.len() >= self.input.reserved,
            "input window of {} bytes is smaller than the {} reserved bytes",
            data.len(),
            self.input.reserved
        );
        self.input.data = data;
        self.input.cur = 0;
    }

    /// Bytes left between the input cursor and the end of the window.
    #[inline]
    pub fn in_remaining(&self) -> usize {
        self.input.data.len() - self.input.cur
    }

    /// Copy `val.len()` bytes from the input cursor into `val`, then advance
    /// the cursor by the slot width `size`.
    ///
    /// On a poisoned stream, or when fewer than `size` bytes remain, `val` is
    /// zero-filled, the cursor stays put and the stream is poisoned.
    #[inline]
    pub fn read(&mut self, size: usize, val: &mut [u8]) {
        debug_assert!(size % WIRE_ALIGN == 0, "unaligned read of {size} bytes");
        debug_assert!(val.len() <= size);

        if self.error || size > self.in_remaining() {
            self.set_error();
            val.fill(0);
            return;
        }

        let cur = self.input.cur;
        val.copy_from_slice(&self.input.data[cur..cur + val.len()]);
        self.input.cur += size;
    }

    /// Like [`Stream::read`] but never advances the cursor.
    #[inline]
    pub fn peek(&mut self, val: &mut [u8]) {
        debug_assert!(val.len() % WIRE_ALIGN == 0, "unaligned peek of {} bytes", val.len());
        if self.error || val.len() > self.in_remaining() {
            self.set_error();
            val.fill(0);
            return;
        }

        let cur = self.input.cur;
        val.copy_from_slice(&self.input.data[cur..cur + val.len()]);
    }

    /// Whether anything has been written since the last reset.
    #[inline]
    pub fn has_out(&self) -> bool {
        match self.output.chunks.len() {
            0 => false,
            1 => self.output.cur > 0,
            _ => true,
        }
    }

    /// Make sure at least `size` contiguous bytes can be written.
    ///
    /// A failure poisons the stream as well.
    #[inline]
    pub fn reserve_out(&mut self, size: usize) -> Result<(), Error> {
        if size > self.output.end - self.output.cur {
            if let Err(e) = self.grow_out(size) {
                tracing::warn!(size, error = %e, "failed to grow command stream");
                self.set_error();
                return Err(e);
            }
            debug_assert!(size <= self.output.end - self.output.cur);
        }

        Ok(())
    }

    fn grow_out(&mut self, size: usize) -> Result<(), Error> {
        let out = &mut self.output;

        if out.chunks.len() == out.chunks.capacity() {
            let slots = grow_size(out.chunks.capacity(), out.chunks.len(), 1, MIN_CHUNK_SLOTS)
                .ok_or(Error::TooLarge(size))?;
            out.chunks
                .try_reserve_exact(slots - out.chunks.len())
                .map_err(|_| Error::OutOfHostMemory)?;
        }

        let chunk_size =
            chunk_size(out.last_chunk_size, size, out.min_chunk_size).ok_or(Error::TooLarge(size))?;

        if let AllocPolicy::Bounded(limit) = self.policy {
            match out.allocated.checked_add(chunk_size) {
                Some(n) if n <= limit => {}
                _ => return Err(Error::OutOfHostMemory),
            }
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(chunk_size)
            .map_err(|_| Error::OutOfHostMemory)?;
        buf.resize(chunk_size, 0);

        out.commit();

        out.chunks.push(Chunk {
            buf,
            len: 0,
            committed: false,
        });
        out.allocated += chunk_size;
        out.last_chunk_size = chunk_size;
        out.cur = 0;
        out.end = chunk_size;

        tracing::debug!(
            chunk_size,
            chunk_count = out.chunks.len(),
            "command stream grew a new chunk"
        );
        Ok(())
    }

    /// Copy `val` to the output cursor and advance it by the slot width
    /// `size`. Padding bytes are zeroed.
    ///
    /// The bytes must have been reserved with [`Stream::reserve_out`].
    #[inline]
    pub fn write(&mut self, size: usize, val: &[u8]) {
        debug_assert!(size % WIRE_ALIGN == 0, "unaligned write of {size} bytes");
        assert!(val.len() <= size);
        if size == 0 {
            return;
        }

        let out = &mut self.output;
        assert!(
            size <= out.end - out.cur,
            "write of {size} bytes past the reserved output"
        );

        let cur = out.cur;
        let chunk = out
            .chunks
            .last_mut()
            .expect("reserved output without a chunk");
        chunk.buf[cur..cur + val.len()].copy_from_slice(val);
        chunk.buf[cur + val.len()..cur + size].fill(0);
        out.cur += size;
    }

    /// End command emission, committing the length of the current chunk.
    pub fn end_out(&mut self) {
        self.output.commit();
    }

    /// Total committed output length. Only valid after [`Stream::end_out`].
    #[inline]
    pub fn out_len(&self) -> usize {
        self.output.total_len
    }

    /// Number of output chunks currently held.
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.output.chunks.len()
    }

    /// Capacities of the output chunks, oldest first.
    pub fn chunk_capacities(&self) -> impl Iterator<Item = usize> + '_ {
        self.output.chunks.iter().map(|c| c.buf.len())
    }

    /// The committed bytes of each output chunk, oldest first.
    pub fn out_chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.output
            .chunks
            .iter()
            .filter(|c| c.committed)
            .map(|c| &c.buf[..c.len])
    }
}

/// Size of the next output chunk: the minimum for the first chunk, twice the
/// previous one afterwards, doubled further until `request` fits.
fn chunk_size(last: usize, request: usize, min: usize) -> Option<usize> {
    let mut size = if last == 0 { min } else { last.checked_mul(2)? };
    while size < request {
        size = size.checked_mul(2)?;
    }
    Some(size)
}

fn grow_size(size: usize, used: usize, growth: usize, min: usize) -> Option<usize> {
    debug_assert!(size >= used && min > 0);
    let size = if size == 0 { min } else { size };

    let mut new_size = size;
    while new_size - used < growth {
        new_size = new_size.checked_mul(2)?;
    }
    Some(new_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    const SEED: u64 = 999;

    fn write_words(cs: &mut Stream<'_>, nbytes: usize, byte: u8) {
        cs.reserve_out(nbytes).unwrap();
        cs.write(nbytes, &vec![byte; nbytes]);
    }

    #[test]
    fn read_past_end_poisons() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.set_in_data(&data);

        let mut word = [0u8; 4];
        cs.read(4, &mut word);
        assert_eq!(word, [1, 2, 3, 4]);
        assert!(!cs.has_error());

        let mut wide = [0xffu8; 8];
        cs.read(8, &mut wide);
        assert!(cs.has_error());
        assert_eq!(wide, [0; 8]);
        assert_eq!(cs.in_remaining(), 4);

        // enough bytes remain, but the stream is poisoned
        let mut word = [0xffu8; 4];
        cs.read(4, &mut word);
        assert_eq!(word, [0; 4]);
        assert_eq!(cs.in_remaining(), 4);

        cs.reset();
        assert!(cs.has_error());
    }

    #[test]
    fn peek_does_not_advance() {
        let data = 7u64.to_le_bytes();
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.set_in_data(&data);

        let mut val = [0u8; 8];
        cs.peek(&mut val);
        assert_eq!(u64::from_le_bytes(val), 7);
        assert_eq!(cs.in_remaining(), 8);

        let mut big = [0xffu8; 12];
        cs.peek(&mut big);
        assert!(cs.has_error());
        assert_eq!(big, [0; 12]);
        assert_eq!(cs.in_remaining(), 8);
    }

    #[test]
    #[should_panic(expected = "reserved bytes")]
    fn window_must_cover_reservation() {
        let data = [0u8; 8];
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.reserve_in(4);
        cs.reserve_in(8);
        cs.set_in_data(&data);
    }

    #[test]
    fn has_out() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        assert!(!cs.has_out());
        cs.reserve_out(8).unwrap();
        assert!(!cs.has_out());
        cs.write(8, &[1; 8]);
        assert!(cs.has_out());
        cs.end_out();
        assert!(cs.has_out());
        cs.reset();
        assert!(!cs.has_out());
    }

    #[test]
    fn two_chunks_for_overflowing_call() {
        let mut cs = Stream::new(AllocPolicy::System, 64);

        // a 16-byte meta-command followed by an 84-byte call
        write_words(&mut cs, 16, 1);
        assert_eq!(cs.chunk_count(), 1);
        write_words(&mut cs, 84, 2);
        assert_eq!(cs.chunk_count(), 2);
        assert_eq!(cs.chunk_capacities().collect::<Vec<_>>(), vec![64, 128]);

        // the first chunk was committed when the second one was created
        let committed: Vec<usize> = cs.out_chunks().map(|c| c.len()).collect();
        assert_eq!(committed, vec![16]);

        cs.end_out();
        assert_eq!(cs.out_len(), 100);
        let chunks: Vec<&[u8]> = cs.out_chunks().collect();
        assert_eq!(chunks[0], &[1; 16][..]);
        assert_eq!(chunks[1], &[2; 84][..]);
    }

    #[test]
    fn single_large_reservation_doubles_the_minimum() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        write_words(&mut cs, 100, 3);
        cs.end_out();
        assert_eq!(cs.chunk_capacities().collect::<Vec<_>>(), vec![128]);
        assert_eq!(cs.out_len(), 100);
    }

    #[test]
    fn chunk_growth_correctness() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let mut cs = Stream::new(AllocPolicy::System, 64);

        let mut written = 0;
        for i in 0..500 {
            let nbytes = rng.gen_range(1..=48) * WIRE_ALIGN;
            write_words(&mut cs, nbytes, i as u8);
            written += nbytes;
        }
        cs.end_out();

        let caps: Vec<usize> = cs.chunk_capacities().collect();
        assert!(caps.len() > 3);
        assert!(caps.windows(2).all(|w| w[0] <= w[1]));

        let lens: Vec<usize> = cs.out_chunks().map(|c| c.len()).collect();
        assert_eq!(lens.len(), caps.len());
        assert!(lens.iter().zip(&caps).all(|(len, cap)| len <= cap));
        assert_eq!(lens.iter().sum::<usize>(), written);
        assert_eq!(cs.out_len(), written);
    }

    #[test]
    fn reset_keeps_the_last_chunk() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        write_words(&mut cs, 60, 1);
        write_words(&mut cs, 100, 2);
        cs.end_out();
        assert_eq!(cs.chunk_count(), 2);

        cs.reset();
        assert_eq!(cs.chunk_count(), 1);
        assert_eq!(cs.chunk_capacities().collect::<Vec<_>>(), vec![128]);
        assert_eq!(cs.out_len(), 0);

        // the kept chunk is reused without growing
        write_words(&mut cs, 128, 3);
        assert_eq!(cs.chunk_count(), 1);
        cs.end_out();
        assert_eq!(cs.out_len(), 128);
    }

    #[test]
    fn padding_is_zeroed() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        write_words(&mut cs, 8, 0xaa);
        cs.end_out();
        cs.reset();

        cs.reserve_out(8).unwrap();
        cs.write(8, &[0x55; 5]);
        cs.end_out();
        let chunk = cs.out_chunks().next().unwrap();
        assert_eq!(chunk, &[0x55, 0x55, 0x55, 0x55, 0x55, 0, 0, 0][..]);
    }

    #[test]
    fn bounded_policy_refuses_growth() {
        let mut cs = Stream::new(AllocPolicy::Bounded(64), 64);
        write_words(&mut cs, 64, 1);
        assert_eq!(cs.reserve_out(4), Err(Error::OutOfHostMemory));
        assert!(cs.has_error());
        // nothing was committed by the failed growth
        assert_eq!(cs.chunk_count(), 1);
    }

    #[test]
    fn overflowing_reservation_is_too_large() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        let size = usize::MAX - 3;
        assert_eq!(cs.reserve_out(size), Err(Error::TooLarge(size)));
        assert!(cs.has_error());
    }

    #[test]
    #[should_panic(expected = "past the reserved output")]
    fn write_requires_reservation() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.reserve_out(8).unwrap();
        cs.write(8, &[0; 8]);
        cs.write(60, &[0; 60]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unaligned write")]
    fn unaligned_write() {
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.reserve_out(8).unwrap();
        cs.write(6, &[0; 6]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unaligned read")]
    fn unaligned_read() {
        let data = [0u8; 8];
        let mut cs = Stream::new(AllocPolicy::System, 64);
        cs.set_in_data(&data);
        let mut val = [0u8; 2];
        cs.read(2, &mut val);
    }
}
