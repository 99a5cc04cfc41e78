//! Language-model collaborator used to structure OCR text.

mod client;

pub use client::{ChatMessage, ChatModel, ChatRequest, LlmConfig, LlmError, OpenAiChatClient};
