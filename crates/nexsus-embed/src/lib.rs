//! Embedding gateway.
//!
//! The only text that ever reaches the embedding provider is the record
//! narrative, and it goes through three stages on the way:
//!
//! 1. [`sanitize`]: null bytes and control characters stripped, blank
//!    texts replaced with a placeholder, oversized texts truncated.
//! 2. [`batch`]: token-and-count-aware batch planning with a
//!    `ceil(len/4)` token estimate (a deliberate under-approximation;
//!    revisit the defaults before swapping in a real tokenizer).
//! 3. [`gateway`]: provider calls wrapped by the embedding circuit
//!    breaker and retry policy, with one-by-one degradation when the
//!    provider rejects a batch. Rejected items come back as zero vectors
//!    so the output always has one vector per input.

pub mod batch;
pub mod gateway;
pub mod provider;
pub mod sanitize;

pub use gateway::EmbeddingGateway;
pub use provider::{EmbeddingProvider, HttpEmbeddingProvider, InputType};
