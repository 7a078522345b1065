//! Streaming chat session over one loaded model
//!
//! All operations on a session run one at a time behind an async mutex. A
//! token stream keeps holding that mutex until generation ends or the
//! consumer drops it, so overlapping requests queue instead of interleaving.

use crate::config::{GenerationOptions, SessionConfig};
use crate::engine::{ChatRequest, ChunkStream, InferenceEngine};
use crate::error::{EdgeError, Result};
use crate::models::locator::AssetLocator;
use crate::models::registry::ModelDescriptor;
use futures_util::{Stream, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

struct LoadedModel {
    descriptor: ModelDescriptor,
    options: GenerationOptions,
}

/// One stateful handle to a model loaded in the inference engine
pub struct InferenceSession {
    engine: Arc<dyn InferenceEngine>,
    locator: Arc<AssetLocator>,
    config: SessionConfig,
    loaded: Arc<tokio::sync::Mutex<Option<LoadedModel>>>,
    current: Mutex<Option<(ModelDescriptor, PathBuf)>>,
    state: watch::Sender<SessionState>,
}

impl InferenceSession {
    #[must_use]
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        locator: Arc<AssetLocator>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unloaded);

        Self {
            engine,
            locator,
            config,
            loaded: Arc::new(tokio::sync::Mutex::new(None)),
            current: Mutex::new(None),
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Descriptor and directory of the loaded model
    #[must_use]
    pub fn model(&self) -> Option<(ModelDescriptor, PathBuf)> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Resolve the model's assets and load them into the engine
    ///
    /// A previously loaded model is released first. On any failure the
    /// session ends up `Failed` with nothing loaded.
    pub async fn load(
        &self,
        descriptor: &ModelDescriptor,
        options: GenerationOptions,
    ) -> Result<()> {
        let mut loaded = self.loaded.lock().await;

        if let Some(previous) = loaded.take() {
            tracing::info!("Unloading {} before loading {}", previous.descriptor.id, descriptor.id);
            self.set_current(None);
            if let Err(e) = self.engine.unload().await {
                tracing::warn!("Failed to unload {}: {e}", previous.descriptor.id);
            }
        }

        self.state.send_replace(SessionState::Loading);
        tracing::info!("Loading model {} via {}", descriptor.id, self.engine.engine_name());

        let result = async {
            let (path, origin) = self.locator.resolve(descriptor, None).await?;
            tracing::debug!("Resolved {} from {origin:?} at {}", descriptor.id, path.display());
            self.engine.load(&path, &descriptor.model_lib).await?;
            Ok::<_, EdgeError>(path)
        }
        .await;

        match result {
            Ok(path) => {
                *loaded = Some(LoadedModel {
                    descriptor: descriptor.clone(),
                    options,
                });
                self.set_current(Some((descriptor.clone(), path)));
                self.state.send_replace(SessionState::Ready);
                tracing::info!("Model {} ready", descriptor.id);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SessionState::Failed);
                tracing::error!("Failed to load model {}: {e}", descriptor.id);
                Err(e)
            }
        }
    }

    /// Generate a complete reply to `prompt`
    pub async fn chat(&self, prompt: &str) -> Result<String> {
        let mut tokens = self.stream(prompt).await?;
        let mut reply = String::new();

        while let Some(token) = tokens.next().await {
            reply.push_str(&token?);
        }

        Ok(reply)
    }

    /// Stream the reply to `prompt` token by token
    ///
    /// Tokens arrive in engine order. An engine failure is delivered as the
    /// final item; the session stays ready afterwards.
    pub async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        self.check_loaded()?;

        let guard = Arc::clone(&self.loaded).lock_owned().await;
        let request = match guard.as_ref() {
            Some(model) => ChatRequest::single_turn(prompt, &model.descriptor.id, &model.options),
            None => return Err(EdgeError::ModelNotLoaded),
        };

        let chunks = self.engine.stream_chat(request).await?;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let producer_cancel = cancel.clone();

        tokio::spawn(async move {
            // Session stays locked for the lifetime of the generation
            let _guard = guard;
            forward_tokens(chunks, tx, producer_cancel).await;
        });

        Ok(TokenStream {
            rx,
            _cancel: cancel.drop_guard(),
        })
    }

    /// Clear conversation context, keeping the model loaded
    pub async fn reset(&self) -> Result<()> {
        self.check_loaded()?;

        let loaded = self.loaded.lock().await;
        if loaded.is_none() {
            return Err(EdgeError::ModelNotLoaded);
        }

        self.engine.reset().await?;
        tracing::debug!("Conversation reset");
        Ok(())
    }

    /// Release the model; the session is `Unloaded` afterwards
    pub async fn unload(&self) -> Result<()> {
        let mut loaded = self.loaded.lock().await;
        let previous = loaded.take();
        self.set_current(None);
        self.state.send_replace(SessionState::Unloaded);

        if let Some(model) = previous {
            tracing::info!("Unloading model {}", model.descriptor.id);
            self.engine.unload().await?;
        }

        Ok(())
    }

    /// Fails without touching the engine or the lock when nothing can be loaded
    fn check_loaded(&self) -> Result<()> {
        match self.state() {
            SessionState::Unloaded | SessionState::Failed => Err(EdgeError::ModelNotLoaded),
            SessionState::Loading | SessionState::Ready => Ok(()),
        }
    }

    fn set_current(&self, model: Option<(ModelDescriptor, PathBuf)>) {
        *self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = model;
    }
}

async fn forward_tokens(
    mut chunks: ChunkStream,
    tx: mpsc::Sender<Result<String>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Token stream dropped, abandoning generation");
                return;
            }
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if let Some(token) = chunk.token() {
                    if tx.send(Ok(token.to_string())).await.is_err() {
                        tracing::debug!("Token consumer gone, abandoning generation");
                        return;
                    }
                }
                if chunk.is_finished() {
                    tracing::debug!("Generation finished: {:?}", chunk.finish_reason);
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Generation failed: {e}");
                let _ = tx.send(Err(e)).await;
                return;
            }
            None => return,
        }
    }
}

/// Tokens of one streamed reply
///
/// Dropping the stream cancels the generation and frees the session.
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String>>,
    _cancel: DropGuard,
}

impl Stream for TokenStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
