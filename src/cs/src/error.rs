use thiserror::Error;

/// Local failures of the output side of a [`Stream`](crate::Stream).
///
/// Decode failures are not reported here; they poison the stream instead,
/// see [`Stream::has_error`](crate::Stream::has_error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("reservation of {0} bytes overflows the chunk size")]
    TooLarge(usize),
}
