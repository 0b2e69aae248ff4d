//! Meta-commands that tell the peer where to write replies.
use cs::{Decode, Encode, FixedSize, Stream};

use crate::command::{decode_reply_header, Command, CommandType, REPLY_HEADER_SIZE};

/// A region of a shared buffer identified by its remote resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandStreamDescription {
    pub resource_id: u32,
    pub offset: u64,
    pub size: u64,
}

impl FixedSize for CommandStreamDescription {
    const WIRE_SIZE: usize = u32::WIRE_SIZE + 2 * u64::WIRE_SIZE;
}

impl Encode for CommandStreamDescription {
    fn sizeof(&self) -> usize {
        Self::WIRE_SIZE
    }

    fn encode(&self, cs: &mut Stream<'_>) {
        self.resource_id.encode(cs);
        self.offset.encode(cs);
        self.size.encode(cs);
    }
}

impl Decode for CommandStreamDescription {
    fn decode(cs: &mut Stream<'_>) -> Self {
        CommandStreamDescription {
            resource_id: u32::decode(cs),
            offset: u64::decode(cs),
            size: u64::decode(cs),
        }
    }
}

/// Switch the reply stream to a new buffer. The reply position restarts at
/// the beginning of the described region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetReplyCommandStream {
    pub stream: CommandStreamDescription,
}

impl Command for SetReplyCommandStream {
    const TYPE: CommandType = CommandType::SetReplyCommandStream;
    type Reply = ();

    fn sizeof_args(&self) -> usize {
        Some(&self.stream).sizeof()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        Some(&self.stream).encode(cs);
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) {
        decode_reply_header(cs, Self::TYPE);
    }
}

/// Move the reply position to `position` bytes into the reply stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekReplyCommandStream {
    pub position: u64,
}

impl Command for SeekReplyCommandStream {
    const TYPE: CommandType = CommandType::SeekReplyCommandStream;
    type Reply = ();

    fn sizeof_args(&self) -> usize {
        self.position.sizeof()
    }

    fn encode_args(&self, cs: &mut Stream<'_>) {
        self.position.encode(cs);
    }

    fn sizeof_reply(&self) -> usize {
        REPLY_HEADER_SIZE
    }

    fn decode_reply(&mut self, cs: &mut Stream<'_>) {
        decode_reply_header(cs, Self::TYPE);
    }
}
