//! A session with a renderer: one command stream shared by all threads,
//! reply slots in a renderer-visible buffer, and the call/send dispatcher.

pub mod config;
pub use config::SessionConfig;

pub mod error;
pub use error::Error;

pub mod logging;

pub mod reply;
pub use reply::{ReplySlot, ReplyStream};

#[allow(clippy::module_inception)]
pub mod session;
pub use session::{Dispatch, Session};
