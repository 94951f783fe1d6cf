//! Scripted HTTP sender for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use tgb_core::{errors::Error, Result};

use crate::client::{HttpReply, HttpSender, Params};

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub url: String,
    pub method: String,
    pub params: Params,
    pub at: Instant,
}

/// Replies are scripted per method name (last URL segment). Methods without a
/// script answer `{"ok":true,"result":true}`.
#[derive(Default)]
pub struct FakeSender {
    scripts: Mutex<HashMap<String, VecDeque<Result<HttpReply>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    downloads: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, method: &str, reply: Result<HttpReply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_json(&self, method: &str, status: u16, body: &str) {
        self.push(
            method,
            Ok(HttpReply {
                status,
                body: body.as_bytes().to_vec(),
            }),
        );
    }

    pub fn push_ok(&self, method: &str, result: serde_json::Value) {
        let body = serde_json::json!({"ok": true, "result": result}).to_string();
        self.push_json(method, 200, &body);
    }

    pub fn push_status(&self, method: &str, status: u16, body: &str) {
        self.push_json(method, status, body);
    }

    pub fn push_err(&self, method: &str, error: &str) {
        self.push(method, Err(Error::External(error.to_string())));
    }

    /// Serve `bytes` for GET requests whose URL ends with `suffix`.
    pub fn serve_file(&self, suffix: &str, bytes: &[u8]) {
        self.downloads
            .lock()
            .unwrap()
            .insert(suffix.to_string(), bytes.to_vec());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Params> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.params)
            .collect()
    }

    /// Time elapsed between consecutive calls to `method`.
    pub fn gaps(&self, method: &str) -> Vec<Duration> {
        let times: Vec<Instant> = self
            .calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.at)
            .collect();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl HttpSender for FakeSender {
    async fn post_json(&self, url: &str, body: &Params, _timeout: Duration) -> Result<HttpReply> {
        let method = url.rsplit('/').next().unwrap_or_default().to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            url: url.to_string(),
            method: method.clone(),
            params: body.clone(),
            at: Instant::now(),
        });

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| {
            Ok(HttpReply {
                status: 200,
                body: br#"{"ok":true,"result":true}"#.to_vec(),
            })
        })
    }

    async fn get_bytes(&self, url: &str, _timeout: Duration) -> Result<HttpReply> {
        let downloads = self.downloads.lock().unwrap();
        let hit = downloads
            .iter()
            .find(|(suffix, _)| url.ends_with(suffix.as_str()))
            .map(|(_, bytes)| bytes.clone());
        Ok(match hit {
            Some(body) => HttpReply { status: 200, body },
            None => HttpReply {
                status: 404,
                body: b"Not Found".to_vec(),
            },
        })
    }
}
