//! Shared fixtures: an in-memory transport and payload builders
#![allow(dead_code)]

use async_trait::async_trait;
use edgellm::error::TransportError;
use edgellm::models::manager::READY_MARKER;
use edgellm::models::{HttpResponse, Transport};
use futures_util::stream::{self, StreamExt};
use rand::RngCore;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

enum Route {
    Body(Vec<u8>),
    Status(u16),
    Fail(String),
}

/// Serves registered URLs from memory and records every request
///
/// Unregistered URLs answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Body(body.into()));
    }

    pub fn status(&self, url: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Status(status));
    }

    pub fn fail(&self, url: &str, reason: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Fail(reason.to_string()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let routes = self.routes.lock().unwrap();
        match routes.get(url) {
            Some(Route::Body(body)) => {
                // Split into two chunks so streaming writes are exercised
                let mid = body.len() / 2;
                let chunks = vec![Ok(body[..mid].to_vec()), Ok(body[mid..].to_vec())];
                Ok(HttpResponse {
                    status: 200,
                    content_length: Some(body.len() as u64),
                    body: stream::iter(chunks).boxed(),
                })
            }
            Some(Route::Status(status)) => Ok(empty(*status)),
            Some(Route::Fail(reason)) => Err(TransportError(reason.clone())),
            None => Ok(empty(404)),
        }
    }
}

fn empty(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        content_length: Some(0),
        body: stream::empty().boxed(),
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Mandatory config and tokenizer files of a compiled model
pub fn mandatory_files() -> Vec<(String, Vec<u8>)> {
    vec![
        (
            READY_MARKER.to_string(),
            br#"{"model_type": "qwen2", "conv_template": "chatml"}"#.to_vec(),
        ),
        (
            "tokenizer.json".to_string(),
            br#"{"version": "1.0", "model": {"type": "BPE"}}"#.to_vec(),
        ),
    ]
}

/// Shard metadata document listing the given paths
pub fn shard_metadata(paths: &[&str]) -> Vec<u8> {
    let records: Vec<_> = paths
        .iter()
        .map(|p| serde_json::json!({"dataPath": p, "format": "raw-shard", "nbytes": 64}))
        .collect();
    serde_json::to_vec(&serde_json::json!({"metadata": {}, "records": records})).unwrap()
}

/// Serve every file under `base/<name>`
pub fn serve_files(transport: &MockTransport, base: &str, files: &[(String, Vec<u8>)]) {
    for (name, body) in files {
        transport.serve(&format!("{base}/{name}"), body.clone());
    }
}

/// Lay files out in a directory, e.g. to compute the expected payload digest
pub fn write_files(dir: &Path, files: &[(String, Vec<u8>)]) {
    for (name, body) in files {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
}

/// Zip archive containing the given files
pub fn zip_archive(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, body) in files {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}
