use bitflags::bitflags;
use static_assertions::const_assert_eq;
use thiserror::Error;

use cs::{Decode, Encode, FixedSize, Stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandType {
    GetVersion = 0,
    CreateDevice = 1,
    DestroyDevice = 2,
    CreateObject = 3,
    DestroyObject = 4,
    WriteObject = 5,
    ReadObject = 6,
    SetReplyCommandStream = 178,
    SeekReplyCommandStream = 179,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown command type {0}")]
pub struct UnknownCommand(pub i32);

impl TryFrom<i32> for CommandType {
    type Error = UnknownCommand;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        let ty = match raw {
            0 => CommandType::GetVersion,
            1 => CommandType::CreateDevice,
            2 => CommandType::DestroyDevice,
            3 => CommandType::CreateObject,
            4 => CommandType::DestroyObject,
            5 => CommandType::WriteObject,
            6 => CommandType::ReadObject,
            178 => CommandType::SetReplyCommandStream,
            179 => CommandType::SeekReplyCommandStream,
            _ => return Err(UnknownCommand(raw)),
        };
        Ok(ty)
    }
}

bitflags! {
    /// Flags of the command header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandFlags: u32 {
        /// The peer writes a reply at the current reply stream position.
        const GENERATE_REPLY = 0b00000001;
    }
}

/// Precedes the arguments of every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    /// Kept raw so that unknown commands can be reported.
    pub ty: i32,
    pub flags: CommandFlags,
}

impl FixedSize for CommandHeader {
    const WIRE_SIZE: usize = i32::WIRE_SIZE + u32::WIRE_SIZE;
}

const_assert_eq!(<CommandHeader as FixedSize>::WIRE_SIZE, 8);

impl Encode for CommandHeader {
    #[inline]
    fn sizeof(&self) -> usize {
        Self::WIRE_SIZE
    }

    #[inline]
    fn encode(&self, cs: &mut Stream<'_>) {
        self.ty.encode(cs);
        self.flags.bits().encode(cs);
    }
}

impl Decode for CommandHeader {
    fn decode(cs: &mut Stream<'_>) -> Self {
        let ty = i32::decode(cs);
        let flags = CommandFlags::from_bits_retain(u32::decode(cs));
        CommandHeader { ty, flags }
    }
}

/// The type of the next command, without consuming it.
pub fn peek_command_type(cs: &mut Stream<'_>) -> i32 {
    let mut buf = [0u8; 4];
    cs::codec::peek(cs, i32::WIRE_SIZE, &mut buf);
    i32::from_le_bytes(buf)
}

/// Every reply starts with the command type it answers.
pub const REPLY_HEADER_SIZE: usize = i32::WIRE_SIZE;

pub fn encode_reply_header(cs: &mut Stream<'_>, ty: CommandType) {
    (ty as i32).encode(cs);
}

/// Check the echoed command type. A mismatch poisons the stream.
pub fn decode_reply_header(cs: &mut Stream<'_>, expected: CommandType) {
    let ty = i32::decode(cs);
    if ty != expected as i32 {
        tracing::debug!(ty, expected = ?expected, "unexpected reply type");
        cs.set_error();
    }
}

/// A remote operation.
///
/// `sizeof`/`encode` serialize the command, `sizeof_reply`/`decode_reply`
/// read its reply back. Sizing mirrors and codecs must agree byte for byte.
pub trait Command {
    const TYPE: CommandType;

    type Reply;

    fn sizeof_args(&self) -> usize;

    fn encode_args(&self, cs: &mut Stream<'_>);

    #[inline]
    fn sizeof(&self) -> usize {
        CommandHeader::WIRE_SIZE + self.sizeof_args()
    }

    fn encode(&self, cs: &mut Stream<'_>, flags: CommandFlags) {
        tracing::trace!(ty = ?Self::TYPE, ?flags, "encode command");
        CommandHeader {
            ty: Self::TYPE as i32,
            flags,
        }
        .encode(cs);
        self.encode_args(cs);
    }

    /// Size of the reply, including the echoed command type.
    fn sizeof_reply(&self) -> usize;

    /// Decode the reply. Output arguments held by the command are filled in.
    fn decode_reply(&mut self, cs: &mut Stream<'_>) -> Self::Reply;
}
