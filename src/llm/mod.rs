//! LLM client for structured document extraction.

mod client;
mod rate_limit;

pub use client::{LlmClient, LlmConfig, LlmError, LlmProvider};
pub use rate_limit::RateLimiter;
