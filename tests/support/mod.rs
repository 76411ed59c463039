//! Shared fixtures for behavior tests: a scripted, recording transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kistrade_core::{
    AppKey, ClientConfig, Domain, HttpClient, HttpError, HttpRequest, HttpResponse, KisClient,
    RateLimitPolicy,
};

pub const TOKEN_PATH: &str = "/oauth2/tokenP";
pub const REVOKE_PATH: &str = "/oauth2/revokeP";

/// Answers token endpoints itself and replays scripted responses for
/// everything else, recording every request it sees.
#[derive(Debug, Default)]
pub struct RecordingHttpClient {
    issued: AtomicUsize,
    token_failure: Mutex<Option<HttpResponse>>,
    scripted: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl RecordingHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: HttpResponse) {
        self.scripted
            .lock()
            .expect("script should not be poisoned")
            .push_back(response);
    }

    pub fn push_json(&self, status: u16, body: &str) {
        self.push(HttpResponse::new(status, body));
    }

    /// Make the next token issuance fail with `response`.
    pub fn fail_next_token(&self, response: HttpResponse) {
        *self
            .token_failure
            .lock()
            .expect("script should not be poisoned") = Some(response);
    }

    pub fn tokens_issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.recorded_requests()
            .into_iter()
            .filter(|request| request.url.contains(path))
            .collect()
    }

    fn issue_token(&self) -> HttpResponse {
        if let Some(failure) = self
            .token_failure
            .lock()
            .expect("script should not be poisoned")
            .take()
        {
            return failure;
        }

        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        HttpResponse::ok_json(format!(
            r#"{{"access_token":"token-{n}","token_type":"Bearer","access_token_token_expired":"2099-12-31 23:59:59","expires_in":86400}}"#
        ))
    }
}

impl HttpClient for RecordingHttpClient {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url.clone();
        self.requests
            .lock()
            .expect("request store should not be poisoned")
            .push(request);

        if url.contains(TOKEN_PATH) {
            return Ok(self.issue_token());
        }
        if url.contains(REVOKE_PATH) {
            return Ok(HttpResponse::ok_json(r#"{"code":200,"message":"revoked"}"#));
        }

        self.scripted
            .lock()
            .expect("script should not be poisoned")
            .pop_front()
            .ok_or_else(|| HttpError::new(format!("no scripted response for {url}")))
    }
}

pub fn real_key() -> AppKey {
    AppKey::new("tester", "PSrealkey", "real-secret")
}

pub fn virtual_key() -> AppKey {
    AppKey::new("tester", "PSvirtualkey", "virtual-secret")
}

/// Real-only config with generous limits and a short quota backoff.
pub fn config() -> ClientConfig {
    ClientConfig::new(real_key())
        .with_base_url(Domain::Real, "https://real.test")
        .with_base_url(Domain::Virtual, "https://virtual.test")
        .with_rate_limit(
            Domain::Real,
            RateLimitPolicy::new(100, Duration::from_secs(1)),
        )
        .with_rate_limit(
            Domain::Virtual,
            RateLimitPolicy::new(100, Duration::from_secs(1)),
        )
        .with_quota_backoff(Duration::from_millis(5))
}

pub fn client(transport: &Arc<RecordingHttpClient>) -> KisClient {
    client_with(config(), transport)
}

pub fn client_with(config: ClientConfig, transport: &Arc<RecordingHttpClient>) -> KisClient {
    KisClient::with_transports(config, Arc::clone(transport) as Arc<dyn HttpClient>, None)
        .expect("client should build")
}

pub fn ok(body: &str) -> HttpResponse {
    HttpResponse::ok_json(body)
}
