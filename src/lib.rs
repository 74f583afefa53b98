// src/lib.rs

pub mod client;
pub mod config;
pub mod connection;
pub mod core;

// Re-export
pub use client::{OpaliteClient, Transaction};
pub use config::Settings;
pub use core::errors::OpaliteError;
pub use core::events::ClientEvent;
