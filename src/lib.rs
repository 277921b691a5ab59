//! Client core of a streaming chat application.
//!
//! A send echoes the user message into a shared [`message_log::MessageLog`],
//! settles the conversation id, then streams the assistant reply into a
//! placeholder bot message through a [`session::StreamSession`].

pub mod api;
pub mod config;
pub mod errors;
pub mod identity;
pub mod message_log;
pub mod models;
pub mod parser;
pub mod service;
pub mod session;
pub mod store;
pub mod transport;

pub use crate::config::ClientConfig;
pub use crate::errors::AppError;
pub use crate::service::ChatService;
