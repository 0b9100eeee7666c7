//! Core types and error definitions for the Conduit LLM call runtime.
//!
//! This crate provides the foundational types shared across all Conduit crates,
//! including error handling, conversation messages, and tool call records.
//!
//! # Main types
//!
//! - [`ConduitError`]: Unified error enum for all Conduit subsystems.
//! - [`ConduitResult`]: Convenience alias for `Result<T, ConduitError>`.
//! - [`Role`]: Message role (user, assistant, system, tool).
//! - [`Message`]: A single turn within a conversation.
//! - [`MessageContent`]: Plain text or structured content parts.
//! - [`ToolCall`]: A completed, model-initiated tool invocation request.

/// Error types.
pub mod error;
/// Conversation message types.
pub mod message;
/// Tool call records.
pub mod tool;

pub use error::{ConduitError, ConduitResult};
pub use message::{Message, MessageContent, Role};
pub use tool::ToolCall;
