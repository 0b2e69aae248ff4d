use std::fmt;

use cs::{Decode, Encode, FixedSize, Stream};

/// Result code of a remote operation. Negative values are failures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Self = Status(0);
    pub const ERROR_OUT_OF_HOST_MEMORY: Self = Status(-1);
    pub const ERROR_OUT_OF_DEVICE_MEMORY: Self = Status(-2);
    pub const ERROR_INITIALIZATION_FAILED: Self = Status(-3);
    pub const ERROR_DEVICE_LOST: Self = Status(-4);
    pub const ERROR_INVALID_HANDLE: Self = Status(-5);
    pub const ERROR_OUT_OF_RANGE: Self = Status(-6);

    #[inline]
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Status::SUCCESS => "SUCCESS",
            Status::ERROR_OUT_OF_HOST_MEMORY => "ERROR_OUT_OF_HOST_MEMORY",
            Status::ERROR_OUT_OF_DEVICE_MEMORY => "ERROR_OUT_OF_DEVICE_MEMORY",
            Status::ERROR_INITIALIZATION_FAILED => "ERROR_INITIALIZATION_FAILED",
            Status::ERROR_DEVICE_LOST => "ERROR_DEVICE_LOST",
            Status::ERROR_INVALID_HANDLE => "ERROR_INVALID_HANDLE",
            Status::ERROR_OUT_OF_RANGE => "ERROR_OUT_OF_RANGE",
            Status(code) => return write!(f, "Status({code})"),
        };
        f.write_str(name)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FixedSize for Status {
    const WIRE_SIZE: usize = i32::WIRE_SIZE;
}

impl Encode for Status {
    #[inline]
    fn sizeof(&self) -> usize {
        Self::WIRE_SIZE
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        self.0.encode(cs);
    }
}

impl Decode for Status {
    #[inline]
    fn decode(cs: &mut Stream<'_>) -> Self {
        Status(i32::decode(cs))
    }
}
