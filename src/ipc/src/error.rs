use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Memfd: {0}.")]
    Memfd(#[from] memfd::Error),
    #[error("IO: {0}.")]
    Io(#[from] io::Error),
    #[error("Invalid buffer size: {0}.")]
    InvalidSize(usize),
    #[error("Range {offset}+{len} exceeds the buffer size {size}.")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("Unknown resource: {0}.")]
    UnknownResource(u32),
    #[error("Malformed command stream: {0}.")]
    Malformed(&'static str),
    #[error("{0}.")]
    UnknownCommand(#[from] protocol::UnknownCommand),
    #[error("Wait timed out.")]
    Timeout,
    #[error("Renderer lost.")]
    Lost,
    #[error("Renderer disconnected.")]
    Disconnected,
}
