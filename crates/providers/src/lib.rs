//! LLM provider implementations for reagent.
//!
//! All providers implement the `reagent_core::Provider` trait.
//! The router maps configured model keys onto providers; `retry` wraps calls
//! with the fixed-delay retry budget.

pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod stream;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, retry};
pub use router::{ModelHandle, ProviderRouter, build_from_config};
pub use stream::{LineBuffer, LineEvent, StreamFormat};
