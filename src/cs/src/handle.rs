//! Wire identities stored inside the objects they name.
//!
//! Both peers refer to a remote object by a 64-bit id. The id lives in the
//! local object itself, so encoding a handle is a load and decoding a newly
//! created one is a one-time store. Device-kind objects and regular objects
//! carry differently typed slots and cannot be mixed up.
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::{Decode, Encode};
use crate::stream::Stream;

/// The 64-bit wire identity. 0 means "no object".
pub type ObjectId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Device,
    Object,
}

pub trait IdentityKind {
    const KIND: HandleKind;
}

#[derive(Debug)]
pub enum DeviceKind {}

#[derive(Debug)]
pub enum ObjectKind {}

impl IdentityKind for DeviceKind {
    const KIND: HandleKind = HandleKind::Device;
}

impl IdentityKind for ObjectKind {
    const KIND: HandleKind = HandleKind::Object;
}

/// A write-once identity slot.
pub struct Identity<K> {
    id: AtomicU64,
    _kind: PhantomData<fn() -> K>,
}

pub type DeviceIdentity = Identity<DeviceKind>;
pub type ObjectIdentity = Identity<ObjectKind>;

impl<K: IdentityKind> Identity<K> {
    pub const fn new() -> Self {
        Identity {
            id: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn kind(&self) -> HandleKind {
        K::KIND
    }

    #[inline]
    pub fn load(&self) -> ObjectId {
        self.id.load(Ordering::Acquire)
    }

    /// Assign the identity.
    ///
    /// # Panics
    ///
    /// Panics if the slot already holds a different id.
    pub fn store(&self, id: ObjectId) {
        if let Err(cur) = self
            .id
            .compare_exchange(0, id, Ordering::AcqRel, Ordering::Acquire)
        {
            assert_eq!(cur, id, "{:?} handle re-identified", K::KIND);
        }
    }
}

impl<K: IdentityKind> Default for Identity<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IdentityKind> fmt::Debug for Identity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("kind", &K::KIND)
            .field("id", &self.load())
            .finish()
    }
}

/// Implemented by every local object that stands for a remote one.
pub trait IdentityCarrier {
    type Kind: IdentityKind;

    fn identity(&self) -> &Identity<Self::Kind>;
}

/// The wire identity of `handle`, or 0 for no handle.
#[inline]
pub fn load_id<T: IdentityCarrier + ?Sized>(handle: Option<&T>) -> ObjectId {
    handle.map_or(0, |h| h.identity().load())
}

#[inline]
pub fn store_id<T: IdentityCarrier + ?Sized>(handle: &T, id: ObjectId) {
    handle.identity().store(id)
}

#[inline]
pub const fn sizeof_handle() -> usize {
    8
}

#[inline]
pub fn encode_handle<T: IdentityCarrier + ?Sized>(cs: &mut Stream<'_>, handle: Option<&T>) {
    load_id(handle).encode(cs);
}

/// Decode an id assigned by the peer into `handle`. A zero id is skipped.
pub fn decode_handle<T: IdentityCarrier + ?Sized>(cs: &mut Stream<'_>, handle: &T) {
    let id = u64::decode(cs);
    if id != 0 {
        store_id(handle, id);
    }
}
