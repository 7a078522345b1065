mod common;

use async_trait::async_trait;
use common::MockTransport;
use edgellm::config::{DownloadConfig, GenerationOptions, SessionConfig, StorageConfig};
use edgellm::engine::{ChatChunk, ChatRequest, ChunkStream, InferenceEngine, Role};
use edgellm::models::manager::READY_MARKER;
use edgellm::models::{AssetLocator, ModelDescriptor, ModelStore};
use edgellm::{EdgeError, InferenceSession, Result, SessionState};
use futures_util::stream::{self, StreamExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum Step {
    Delta(&'static str),
    Finish,
    Fail(&'static str),
    Hang,
}

/// Engine double that records every call
#[derive(Default)]
struct SpyEngine {
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    script: Mutex<Vec<Step>>,
    fail_load: bool,
    stream_dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl SpyEngine {
    fn scripted(steps: &[Step]) -> Self {
        Self {
            script: Mutex::new(steps.to_vec()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl InferenceEngine for SpyEngine {
    async fn load(&self, model_path: &Path, model_lib: &str) -> Result<()> {
        self.record(&format!("load {} {model_lib}", model_path.display()));
        if self.fail_load {
            return Err(EdgeError::Engine("model library not found".to_string()));
        }
        Ok(())
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream> {
        self.record("stream_chat");
        self.requests.lock().unwrap().push(request);

        let steps = self.script.lock().unwrap().clone();
        let mut items = Vec::new();
        let mut hang = false;
        for step in steps {
            match step {
                Step::Delta(text) => items.push(Ok(ChatChunk::delta(text))),
                Step::Finish => items.push(Ok(ChatChunk::finish("stop"))),
                Step::Fail(reason) => items.push(Err(EdgeError::Engine(reason.to_string()))),
                Step::Hang => hang = true,
            }
        }

        let flag = DropFlag(self.stream_dropped.clone());
        let tail: ChunkStream = if hang {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };
        Ok(stream::iter(items)
            .chain(tail)
            .map(move |item| {
                let _alive = &flag;
                item
            })
            .boxed())
    }

    async fn reset(&self) -> Result<()> {
        self.record("reset");
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.record("unload");
        Ok(())
    }

    fn engine_name(&self) -> &str {
        "spy"
    }
}

/// Engine double that echoes the prompt word by word and notes any overlap
#[derive(Default)]
struct EchoEngine {
    calls: Mutex<Vec<&'static str>>,
    streams: Arc<AtomicUsize>,
    max_streams: AtomicUsize,
    loading: AtomicBool,
    overlapping_loads: AtomicBool,
}

struct ActiveStream(Arc<AtomicUsize>);

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl InferenceEngine for EchoEngine {
    async fn load(&self, _model_path: &Path, _model_lib: &str) -> Result<()> {
        self.calls.lock().unwrap().push("load");
        if self.loading.swap(true, Ordering::SeqCst) {
            self.overlapping_loads.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.loading.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream> {
        self.calls.lock().unwrap().push("stream_chat");
        let active = self.streams.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_streams.fetch_max(active, Ordering::SeqCst);
        let active = ActiveStream(self.streams.clone());

        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let words: Vec<String> = prompt.split_inclusive(' ').map(str::to_string).collect();

        // Yield between words so concurrent generations would interleave
        Ok(stream::iter(words)
            .then(|word| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, EdgeError>(ChatChunk::delta(word))
            })
            .chain(stream::once(async { Ok(ChatChunk::finish("stop")) }))
            .map(move |item| {
                let _active = &active;
                item
            })
            .boxed())
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        self.calls.lock().unwrap().push("unload");
        Ok(())
    }

    fn engine_name(&self) -> &str {
        "echo"
    }
}

struct Fixture {
    _temp: TempDir,
    transport: Arc<MockTransport>,
    model_dir: PathBuf,
    session: InferenceSession,
}

fn model() -> ModelDescriptor {
    ModelDescriptor::new("test-model", "Test", "test_q4f16_1", None)
}

fn options() -> GenerationOptions {
    GenerationOptions {
        temperature: 0.3,
        max_tokens: 128,
        top_p: 0.9,
    }
}

fn fixture<E: InferenceEngine + 'static>(engine: &Arc<E>) -> Fixture {
    let temp = TempDir::new().unwrap();
    let storage = StorageConfig {
        root: temp.path().join("store"),
        cache_dir: temp.path().join("cache"),
        dev_cache_dir: None,
        bundle_dir: None,
    };

    let model_dir = temp.path().join("cache/test-model");
    fs::create_dir_all(&model_dir).unwrap();
    fs::write(model_dir.join(READY_MARKER), "{}").unwrap();

    let transport = Arc::new(MockTransport::new());
    let store = ModelStore::new(&storage, DownloadConfig::default(), transport.clone()).unwrap();
    let locator = Arc::new(AssetLocator::new(&storage, Arc::new(store)));
    let session = InferenceSession::new(engine.clone(), locator, SessionConfig::default());

    Fixture {
        _temp: temp,
        transport,
        model_dir,
        session,
    }
}

async fn collect(session: &InferenceSession, prompt: &str) -> Vec<Result<String>> {
    session.stream(prompt).await.unwrap().collect().await
}

#[tokio::test]
async fn test_chat_unloaded_makes_no_calls() {
    let engine = Arc::new(SpyEngine::default());
    let f = fixture(&engine);

    assert_eq!(f.session.state(), SessionState::Unloaded);
    assert!(matches!(f.session.chat("Hi").await, Err(EdgeError::ModelNotLoaded)));
    assert!(matches!(f.session.stream("Hi").await, Err(EdgeError::ModelNotLoaded)));
    assert!(matches!(f.session.reset().await, Err(EdgeError::ModelNotLoaded)));

    assert!(engine.calls().is_empty());
    assert!(f.transport.requests().is_empty());
}

#[tokio::test]
async fn test_load_then_stream_tokens_in_order() {
    let engine = Arc::new(SpyEngine::scripted(&[
        Step::Delta("Hello"),
        Step::Delta(" world"),
        Step::Finish,
        Step::Delta("after finish"),
    ]));
    let f = fixture(&engine);

    f.session.load(&model(), options()).await.unwrap();
    assert_eq!(f.session.state(), SessionState::Ready);
    assert_eq!(
        engine.calls(),
        vec![format!("load {} test_q4f16_1", f.model_dir.display())]
    );

    let tokens: Vec<String> = collect(&f.session, "Say hi")
        .await
        .into_iter()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(tokens, vec!["Hello", " world"]);

    let requests = engine.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].role, Role::User);
    assert_eq!(requests[0].messages[0].content, "Say hi");
    assert_eq!(requests[0].model, "test-model");
    assert_eq!(requests[0].max_tokens, 128);
    assert!((requests[0].temperature - 0.3).abs() < f32::EPSILON);
}

#[tokio::test]
async fn test_chat_concatenates_stream() {
    let engine = Arc::new(SpyEngine::scripted(&[
        Step::Delta("Hello"),
        Step::Delta(""),
        Step::Delta(" world"),
        Step::Finish,
    ]));
    let f = fixture(&engine);
    f.session.load(&model(), options()).await.unwrap();

    assert_eq!(f.session.chat("Hi").await.unwrap(), "Hello world");
}

#[tokio::test]
async fn test_stream_error_keeps_session_ready() {
    let engine = Arc::new(SpyEngine::scripted(&[
        Step::Delta("Hel"),
        Step::Fail("device lost"),
    ]));
    let f = fixture(&engine);
    f.session.load(&model(), options()).await.unwrap();

    let items = collect(&f.session, "Hi").await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Hel");
    assert!(matches!(items[1], Err(EdgeError::Engine(ref msg)) if msg == "device lost"));

    assert_eq!(f.session.state(), SessionState::Ready);
    assert!(matches!(f.session.chat("Again").await, Err(EdgeError::Engine(_))));
    assert_eq!(engine.calls().iter().filter(|c| *c == "stream_chat").count(), 2);
}

#[tokio::test]
async fn test_dropping_stream_cancels_generation() {
    let engine = Arc::new(SpyEngine::scripted(&[Step::Delta("partial"), Step::Hang]));
    let f = fixture(&engine);
    f.session.load(&model(), options()).await.unwrap();

    let mut tokens = f.session.stream("Tell me a story").await.unwrap();
    assert_eq!(tokens.next().await.unwrap().unwrap(), "partial");

    // Session is busy while the generation runs
    let blocked = tokio::time::timeout(Duration::from_millis(50), f.session.reset()).await;
    assert!(blocked.is_err());

    drop(tokens);

    tokio::time::timeout(Duration::from_secs(2), f.session.reset())
        .await
        .expect("session lock was not released")
        .unwrap();
    assert!(engine.stream_dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_reset_and_unload() {
    let engine = Arc::new(SpyEngine::scripted(&[Step::Delta("ok"), Step::Finish]));
    let f = fixture(&engine);
    f.session.load(&model(), options()).await.unwrap();

    f.session.reset().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Ready);

    let (descriptor, path) = f.session.model().unwrap();
    assert_eq!(descriptor.id, "test-model");
    assert_eq!(path, f.model_dir);

    f.session.unload().await.unwrap();
    assert_eq!(f.session.state(), SessionState::Unloaded);
    assert!(f.session.model().is_none());

    let calls_after_unload = engine.calls().len();
    assert!(matches!(f.session.chat("Hi").await, Err(EdgeError::ModelNotLoaded)));
    assert_eq!(engine.calls().len(), calls_after_unload);
    assert_eq!(engine.calls()[1..], ["reset".to_string(), "unload".to_string()]);
}

#[tokio::test]
async fn test_engine_load_failure_marks_failed() {
    let engine = Arc::new(SpyEngine {
        fail_load: true,
        ..SpyEngine::default()
    });
    let f = fixture(&engine);
    let mut state = f.session.subscribe();

    let result = f.session.load(&model(), options()).await;
    assert!(matches!(result, Err(EdgeError::Engine(_))));
    assert_eq!(f.session.state(), SessionState::Failed);
    assert_eq!(*state.borrow_and_update(), SessionState::Failed);

    assert!(matches!(f.session.chat("Hi").await, Err(EdgeError::ModelNotLoaded)));
    assert_eq!(engine.calls().len(), 1);
}

#[tokio::test]
async fn test_missing_assets_never_reach_engine() {
    let engine = Arc::new(SpyEngine::default());
    let f = fixture(&engine);
    let unknown = ModelDescriptor::new("other-model", "Other", "other_lib", None);

    let result = f.session.load(&unknown, options()).await;
    assert!(matches!(result, Err(EdgeError::ModelNotFound(ref id)) if id == "other-model"));
    assert_eq!(f.session.state(), SessionState::Failed);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_reload_releases_previous_model() {
    let engine = Arc::new(SpyEngine::default());
    let f = fixture(&engine);

    f.session.load(&model(), options()).await.unwrap();
    f.session.load(&model(), GenerationOptions::default()).await.unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1], "unload");
    assert_eq!(f.session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_concurrent_chats_do_not_interleave() {
    let engine = Arc::new(EchoEngine::default());
    let f = fixture(&engine);
    f.session.load(&model(), options()).await.unwrap();

    let (first, second) = tokio::join!(
        f.session.chat("one two three"),
        f.session.chat("four five six")
    );

    assert_eq!(first.unwrap(), "one two three");
    assert_eq!(second.unwrap(), "four five six");
    assert_eq!(engine.max_streams.load(Ordering::SeqCst), 1);
    assert_eq!(engine.streams.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_loads_run_one_at_a_time() {
    let engine = Arc::new(EchoEngine::default());
    let f = fixture(&engine);

    let (model_a, model_b) = (model(), model());
    let (first, second) = tokio::join!(
        f.session.load(&model_a, options()),
        f.session.load(&model_b, GenerationOptions::default())
    );

    first.unwrap();
    second.unwrap();
    assert_eq!(*engine.calls.lock().unwrap(), ["load", "unload", "load"]);
    assert!(!engine.overlapping_loads.load(Ordering::SeqCst));
    assert_eq!(f.session.state(), SessionState::Ready);
}
