//! Wire protocol spoken over the command stream.
//!
//! A command is a [`CommandHeader`] followed by its arguments. Commands
//! with [`CommandFlags::GENERATE_REPLY`] get a reply written at the current
//! reply stream position, which the meta-commands in [`meta`] control.

pub mod command;
pub use command::{
    peek_command_type, Command, CommandFlags, CommandHeader, CommandType, UnknownCommand,
};

pub mod meta;
pub use meta::{CommandStreamDescription, SeekReplyCommandStream, SetReplyCommandStream};

pub mod ops;
pub use ops::{
    CreateDevice, CreateObject, DestroyDevice, DestroyObject, Device, GetVersion, Object,
    ObjectCreateInfo, ReadObject, WriteObject,
};

pub mod request;
pub use request::{Reply, Request};

pub mod status;
pub use status::Status;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest peer version a session accepts.
pub const MIN_PROTOCOL_VERSION: u32 = 1;
