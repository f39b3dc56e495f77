//! In-process transport double for client and scheduler tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use url::Url;

use super::transport::{HttpResponse, HttpTransport, TransportError};

type Handler = Box<dyn Fn(&Url, usize) -> Result<HttpResponse, TransportError> + Send + Sync>;

pub struct FakeTransport {
    handler: Handler,
    calls: Mutex<Vec<(Url, String)>>,
}

impl FakeTransport {
    /// Answer every request with `handler(url, call_index)`.
    pub fn new(
        handler: impl Fn(&Url, usize) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        FakeTransport {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replay `responses` in order; the last one repeats once exhausted.
    pub fn scripted(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        FakeTransport::new(move |_, _| {
            let mut queue = queue.lock();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(Url, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, url: &Url, auth_token: &str) -> Result<HttpResponse, TransportError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push((url.clone(), auth_token.to_string()));
            calls.len() - 1
        };
        (self.handler)(url, index)
    }
}

pub fn ok_json(body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
        retry_after: None,
    })
}

pub fn status(code: u16) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: code,
        body: format!("{{\"message\":\"status {}\"}}", code),
        retry_after: None,
    })
}

/// One football-data match entry.
pub fn match_json(id: i64, status: &str, home: u32, away: u32, minute: Option<u32>, competition: &str) -> Value {
    serde_json::json!({
        "id": id,
        "status": status,
        "minute": minute,
        "competition": {"code": competition},
        "homeTeam": {"name": format!("Home {}", id)},
        "awayTeam": {"name": format!("Away {}", id)},
        "score": {"fullTime": {"home": home, "away": away}}
    })
}

pub fn matches_body(matches: Vec<Value>) -> Value {
    serde_json::json!({ "matches": matches })
}
