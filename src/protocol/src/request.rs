//! The peer's view of the protocol: commands decoded into owned requests,
//! and the replies written back.
use cs::codec::{decode_array_size, decode_blob, encode_array_size, encode_blob, sizeof_array_size, sizeof_blob};
use cs::{Decode, Encode, FixedSize, ObjectId, Stream};

use crate::command::{
    encode_reply_header, CommandFlags, CommandHeader, CommandType, UnknownCommand,
    REPLY_HEADER_SIZE,
};
use crate::meta::CommandStreamDescription;
use crate::ops::ObjectCreateInfo;
use crate::status::Status;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetVersion,
    CreateDevice {
        name: String,
    },
    DestroyDevice {
        device: ObjectId,
    },
    CreateObject {
        device: ObjectId,
        info: Option<ObjectCreateInfo>,
    },
    DestroyObject {
        device: ObjectId,
        object: ObjectId,
    },
    WriteObject {
        device: ObjectId,
        object: ObjectId,
        offset: u64,
        data: Vec<u8>,
    },
    ReadObject {
        device: ObjectId,
        object: ObjectId,
        offset: u64,
        size: u64,
    },
    SetReplyCommandStream(Option<CommandStreamDescription>),
    SeekReplyCommandStream {
        position: u64,
    },
}

impl Request {
    /// Decode the next command. Truncated input poisons `cs` as usual; an
    /// unknown command type is an error since its length is unknown.
    pub fn decode(cs: &mut Stream<'_>) -> Result<(CommandFlags, Request), UnknownCommand> {
        let header = CommandHeader::decode(cs);
        let ty = CommandType::try_from(header.ty)?;

        let request = match ty {
            CommandType::GetVersion => Request::GetVersion,
            CommandType::CreateDevice => Request::CreateDevice {
                name: String::decode(cs),
            },
            CommandType::DestroyDevice => Request::DestroyDevice {
                device: u64::decode(cs),
            },
            CommandType::CreateObject => Request::CreateObject {
                device: u64::decode(cs),
                info: Option::<ObjectCreateInfo>::decode(cs),
            },
            CommandType::DestroyObject => Request::DestroyObject {
                device: u64::decode(cs),
                object: u64::decode(cs),
            },
            CommandType::WriteObject => Request::WriteObject {
                device: u64::decode(cs),
                object: u64::decode(cs),
                offset: u64::decode(cs),
                data: decode_bytes(cs),
            },
            CommandType::ReadObject => Request::ReadObject {
                device: u64::decode(cs),
                object: u64::decode(cs),
                offset: u64::decode(cs),
                size: u64::decode(cs),
            },
            CommandType::SetReplyCommandStream => {
                Request::SetReplyCommandStream(Option::<CommandStreamDescription>::decode(cs))
            }
            CommandType::SeekReplyCommandStream => Request::SeekReplyCommandStream {
                position: u64::decode(cs),
            },
        };

        Ok((header.flags, request))
    }

    pub fn command_type(&self) -> CommandType {
        match self {
            Request::GetVersion => CommandType::GetVersion,
            Request::CreateDevice { .. } => CommandType::CreateDevice,
            Request::DestroyDevice { .. } => CommandType::DestroyDevice,
            Request::CreateObject { .. } => CommandType::CreateObject,
            Request::DestroyObject { .. } => CommandType::DestroyObject,
            Request::WriteObject { .. } => CommandType::WriteObject,
            Request::ReadObject { .. } => CommandType::ReadObject,
            Request::SetReplyCommandStream(_) => CommandType::SetReplyCommandStream,
            Request::SeekReplyCommandStream { .. } => CommandType::SeekReplyCommandStream,
        }
    }
}

fn decode_bytes(cs: &mut Stream<'_>) -> Vec<u8> {
    let max = cs.in_remaining();
    let len = decode_array_size(cs, max);
    let mut data = vec![0u8; len];
    decode_blob(cs, &mut data);
    data
}

/// Reply bodies, one shape per family of commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Void,
    Version(u32),
    Status(Status),
    /// Status and the identity assigned to the new device or object.
    Created(Status, ObjectId),
    Data(Status, Vec<u8>),
}

impl Reply {
    pub fn sizeof(&self) -> usize {
        REPLY_HEADER_SIZE
            + match self {
                Reply::Void => 0,
                Reply::Version(_) => u32::WIRE_SIZE,
                Reply::Status(_) => Status::WIRE_SIZE,
                Reply::Created(..) => Status::WIRE_SIZE + u64::WIRE_SIZE,
                Reply::Data(_, data) => {
                    Status::WIRE_SIZE + sizeof_array_size(data.len()) + sizeof_blob(data.len())
                }
            }
    }

    pub fn encode(&self, cs: &mut Stream<'_>, ty: CommandType) {
        encode_reply_header(cs, ty);
        match self {
            Reply::Void => {}
            Reply::Version(version) => version.encode(cs),
            Reply::Status(status) => status.encode(cs),
            Reply::Created(status, id) => {
                status.encode(cs);
                id.encode(cs);
            }
            Reply::Data(status, data) => {
                status.encode(cs);
                encode_array_size(cs, data.len());
                encode_blob(cs, data);
            }
        }
    }
}
