//! Transport between a session and the renderer executing its commands.

pub mod bo;
pub use bo::BufferObject;

pub mod error;
pub use error::Error;

pub mod loopback;
pub use loopback::LoopbackRenderer;

pub mod renderer;
pub use renderer::{Renderer, RendererInfo, Submit, SyncPoint, Wait};

pub mod sync;
pub use sync::SyncObject;
