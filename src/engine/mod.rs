pub mod protocol;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::path::Path;

pub use protocol::{ChatChunk, ChatMessage, ChatRequest, Role};

/// Stream of completion chunks produced by an engine
pub type ChunkStream = BoxStream<'static, Result<ChatChunk>>;

/// Boundary to the native inference engine
///
/// The engine owns tensor compute, tokenization and device execution. A
/// session drives it through these four calls only.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Load the model directory using the given engine library
    async fn load(&self, model_path: &Path, model_lib: &str) -> Result<()>;

    /// Start a streaming chat completion
    ///
    /// Dropping the returned stream abandons the generation.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream>;

    /// Clear conversational state, keeping the model loaded
    async fn reset(&self) -> Result<()>;

    /// Release the loaded model
    async fn unload(&self) -> Result<()>;

    /// Get engine name for logging/debugging
    fn engine_name(&self) -> &str;
}
