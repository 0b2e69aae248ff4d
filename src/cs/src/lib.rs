//! Command stream.
//!
//! A [`Stream`] pairs a bounded input cursor (for decoding replies out of a
//! caller-supplied window) with a growable, chunked output buffer (for
//! encoding commands). Every structured encoder in the protocol is built from
//! the primitive [`codec::encode`]/[`codec::decode`] pair on top of it.

pub mod codec;
pub use codec::{Decode, Encode, FixedSize};

pub mod error;
pub use error::Error;

pub mod handle;
pub use handle::{
    load_id, store_id, DeviceIdentity, DeviceKind, HandleKind, Identity, IdentityCarrier, IdentityKind,
    ObjectId, ObjectIdentity, ObjectKind,
};

pub mod stream;
pub use stream::{AllocPolicy, Stream, WIRE_ALIGN};
