// src/core/protocol/mod.rs

pub mod command;
pub mod frame;
pub mod messages;
pub mod package;

pub use command::TcpCommand;
pub use frame::{FrameCodec, MAX_FRAME_LENGTH};
pub use package::{Credentials, FLAG_AUTHENTICATED, Package, PackageCodec};
