// src/connection/mod.rs

//! The connection lifecycle: task queue, state machine engine, transport
//! channel with heartbeat monitoring, and the authentication handshake.

pub mod auth;
pub mod channel;
pub mod engine;
pub mod stream;
pub mod tasks;

pub use channel::{ChannelHandle, PackageSender};
pub use engine::ConnectionEngine;
pub use tasks::{Task, TaskSender, task_queue};
