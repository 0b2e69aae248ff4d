//! Remote operations on devices and the objects they own.
use cs::codec::{self, decode_array_size, encode_array_size, sizeof_array_size, sizeof_blob};
use cs::handle::{decode_handle, encode_handle, sizeof_handle};
use cs::{
    Decode, DeviceIdentity, DeviceKind, Encode, FixedSize, IdentityCarrier, ObjectId,
    ObjectIdentity, ObjectKind, Stream,
};

use crate::command::{decode_reply_header, Command, CommandType, REPLY_HEADER_SIZE};
use crate::status::Status;

/// Local proxy of a remote device.
#[derive(Debug, Default)]
pub struct Device {
    identity: DeviceIdentity,
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.identity.load()
    }
}

impl IdentityCarrier for Device {
    type Kind = DeviceKind;

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}

/// Local proxy of a remote object owned by a device.
#[derive(Debug, Default)]
pub struct Object {
    identity: ObjectIdentity,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.identity.load()
    }
}

impl IdentityCarrier for Object {
    type Kind = ObjectKind;

    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectCreateInfo {
    pub size: u64,
    pub label: Option<String>,
}

impl Encode for ObjectCreateInfo {
    fn sizeof(&self) -> usize {
        self.size.sizeof() + self.label.sizeof()
    }

    fn encode(&self, cs: &mut Stream<'_>) {
        self.size.encode(cs);
        self.label.encode(cs);
    }
}

impl Decode for ObjectCreateInfo {
    fn decode(cs: &mut Stream<'_>) -> Self {
        ObjectCreateInfo {
            size: u64::decode(cs),
            label: Option::<String>::decode(cs),
        }
    }
}

/// Query the protocol version implemented by the peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetVersion;

impl Command for GetVersion {
    const TYPE: CommandType = CommandType::GetVersion;
    type Reply = u32;

    fn sizeof_args(&self) -> usize {
        0
    }

    fn encode_args(&self, _cs: &mut Stream<'_>) {}

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE + u32::WIRE_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> u32 {
        decode_reply_header(cs, Self::TYPE);
        u32::decode(cs)
    }
}

/// Create a device. On success the peer assigns its identity.
#[derive(Debug)]
pub struct CreateDevice<'a> {
    pub name: &'a str,
    pub device: &'a Device,
}

impl<'a> Command for CreateDevice<'a> {
    const TYPE: CommandType = CommandType::CreateDevice;
    type Reply = Status;

    fn sizeof_args(&self) -> usize {
        self.name.sizeof()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        self.name.encode(cs);
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE + Status::WIRE_SIZE + sizeof_handle()
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> Status {
        decode_reply_header(cs, Self::TYPE);
        let status = Status::decode(cs);
        decode_handle(cs, self.device);
        status
    }
}

#[derive(Debug)]
pub struct DestroyDevice<'a> {
    pub device: &'a Device,
}

impl<'a> Command for DestroyDevice<'a> {
    const TYPE: CommandType = CommandType::DestroyDevice;
    type Reply = ();

    fn sizeof_args(&self) -> usize {
        sizeof_handle()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        encode_handle(cs, Some(self.device));
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) {
        decode_reply_header(cs, Self::TYPE);
    }
}

/// Create an object on `device`. On success the peer assigns its identity.
#[derive(Debug)]
pub struct CreateObject<'a> {
    pub device: &'a Device,
    pub info: Option<&'a ObjectCreateInfo>,
    pub object: &'a Object,
}

impl<'a> Command for CreateObject<'a> {
    const TYPE: CommandType = CommandType::CreateObject;
    type Reply = Status;

    fn sizeof_args(&self) -> usize {
        sizeof_handle() + self.info.sizeof()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        encode_handle(cs, Some(self.device));
        self.info.encode(cs);
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE + Status::WIRE_SIZE + sizeof_handle()
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> Status {
        decode_reply_header(cs, Self::TYPE);
        let status = Status::decode(cs);
        decode_handle(cs, self.object);
        status
    }
}

#[derive(Debug)]
pub struct DestroyObject<'a> {
    pub device: &'a Device,
    pub object: &'a Object,
}

impl<'a> Command for DestroyObject<'a> {
    const TYPE: CommandType = CommandType::DestroyObject;
    type Reply = ();

    fn sizeof_args(&self) -> usize {
        2 * sizeof_handle()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        encode_handle(cs, Some(self.device));
        encode_handle(cs, Some(self.object));
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) {
        decode_reply_header(cs, Self::TYPE);
    }
}

/// Copy `data` into an object's storage at `offset`.
#[derive(Debug)]
pub struct WriteObject<'a> {
    pub device: &'a Device,
    pub object: &'a Object,
    pub offset: u64,
    pub data: &'a [u8],
}

impl<'a> Command for WriteObject<'a> {
    const TYPE: CommandType = CommandType::WriteObject;
    type Reply = Status;

    fn sizeof_args(&self) -> usize {
        2 * sizeof_handle()
            + self.offset.sizeof()
            + sizeof_array_size(self.data.len())
            + sizeof_blob(self.data.len())
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        encode_handle(cs, Some(self.device));
        encode_handle(cs, Some(self.object));
        self.offset.encode(cs);
        encode_array_size(cs, self.data.len());
        codec::encode_blob(cs, self.data);
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE + Status::WIRE_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> Status {
        decode_reply_header(cs, Self::TYPE);
        Status::decode(cs)
    }
}

/// Read `data.len()` bytes of an object's storage at `offset` into `data`.
///
/// The peer may return fewer bytes than requested; the rest of `data` is
/// left untouched.
#[derive(Debug)]
pub struct ReadObject<'a> {
    pub device: &'a Device,
    pub object: &'a Object,
    pub offset: u64,
    pub data: &'a mut [u8],
}

impl<'a> Command for ReadObject<'a> {
    const TYPE: CommandType = CommandType::ReadObject;
    type Reply = Status;

    fn sizeof_args(&self) -> usize {
        2 * sizeof_handle() + self.offset.sizeof() + sizeof_array_size(self.data.len())
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        encode_handle(cs, Some(self.device));
        encode_handle(cs, Some(self.object));
        self.offset.encode(cs);
        encode_array_size(cs, self.data.len());
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE
            + Status::WIRE_SIZE
            + sizeof_array_size(self.data.len())
            + sizeof_blob(self.data.len())
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> Status {
        decode_reply_header(cs, Self::TYPE);
        let status = Status::decode(cs);
        let len = decode_array_size(cs, self.data.len());
        codec::decode_blob(cs, &mut self.data[..len]);
        status
    }
}
