//! Streaming completion client: sends one chat request and turns the
//! `data: `-framed response into a growing text result.

mod client;
mod error;
pub mod frame;

pub use client::{
    ClientConfig, CompletionSource, DEFAULT_ENDPOINT, Progress, ProgressStream,
    StreamingCompletionClient, accumulate, final_text,
};
pub use error::TransportError;
pub use frame::{FrameDecoder, StreamFrame};
