use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Nothing reached the renderer. The session stays usable.
    #[error("Out of host memory.")]
    OutOfHostMemory,
    #[error("Command of {0} bytes is too large.")]
    TooLarge(usize),
    #[error("Transport: {0}.")]
    Transport(#[from] ipc::Error),
    #[error("Timed out waiting for a reply.")]
    Timeout,
    /// The session can no longer be trusted.
    #[error("Device lost.")]
    DeviceLost,
    #[error("Invalid configuration: {0}.")]
    InvalidConfig(String),
    #[error("Renderer speaks protocol version {found}, at least {required} is required.")]
    IncompatibleRenderer { found: u32, required: u32 },
}

impl From<cs::Error> for Error {
    fn from(e: cs::Error) -> Self {
        match e {
            cs::Error::OutOfHostMemory => Error::OutOfHostMemory,
            cs::Error::TooLarge(size) => Error::TooLarge(size),
        }
    }
}
