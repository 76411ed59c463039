//! Authenticated, throttled request pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, QUOTA_EXCEEDED_CODE, TOKEN_EXPIRED_CODE};
use crate::domain::{AppKey, Domain, DomainMap};
use crate::error::KisError;
use crate::http_client::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};
use crate::materialize::{materialize, DecodeError, Materialized, Shape};
use crate::throttling::RateLimiter;
use crate::token::{HttpTokenIssuer, TokenManager, TokenStore};

/// Top-level JSON key carrying response diagnostics; never materialized.
pub const RESPONSE_TAG: &str = "__response__";

/// Where the credential pair is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKeyLocation {
    Header,
    Body,
}

/// Request part a form injector writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormTarget {
    Header,
    Params,
    Body,
}

/// Collaborator that contributes a fixed set of owned keys to a request.
pub trait FormInjector {
    fn form_entries(&self) -> Vec<(&'static str, String)>;
}

#[derive(Debug, Clone)]
struct Injection {
    target: Option<FormTarget>,
    entries: Vec<(&'static str, String)>,
}

/// Declarative description of one vendor call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    path: String,
    method: HttpMethod,
    params: BTreeMap<String, String>,
    body: Option<BTreeMap<String, String>>,
    headers: BTreeMap<String, String>,
    injections: Vec<Injection>,
    domain: Option<Domain>,
    appkey_location: Option<AppKeyLocation>,
    auth: bool,
    quiet: bool,
}

impl ApiRequest {
    /// Authenticated request with the credential pair in the headers.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            params: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
            injections: Vec::new(),
            domain: None,
            appkey_location: Some(AppKeyLocation::Header),
            auth: true,
            quiet: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_body_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.body
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Vendor transaction id header.
    pub fn with_tr_id(self, tr_id: impl Into<String>) -> Self {
        self.with_header("tr_id", tr_id)
    }

    /// Inject into params for GET and into the body otherwise.
    pub fn with_form(self, injector: &impl FormInjector) -> Self {
        self.push_injection(None, injector)
    }

    pub fn with_form_at(self, target: FormTarget, injector: &impl FormInjector) -> Self {
        self.push_injection(Some(target), injector)
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_appkey(mut self, location: AppKeyLocation) -> Self {
        self.appkey_location = Some(location);
        self
    }

    pub fn without_appkey(mut self) -> Self {
        self.appkey_location = None;
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.auth = false;
        self
    }

    /// Suppress the response summary log line.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub const fn domain(&self) -> Option<Domain> {
        self.domain
    }

    pub const fn requires_auth(&self) -> bool {
        self.auth
    }

    pub const fn is_quiet(&self) -> bool {
        self.quiet
    }

    fn push_injection(mut self, target: Option<FormTarget>, injector: &impl FormInjector) -> Self {
        self.injections.push(Injection {
            target,
            entries: injector.form_entries(),
        });
        self
    }
}

/// Persistent transport, rate limiter and credential for one domain.
pub struct Session {
    domain: Domain,
    base_url: String,
    credential: AppKey,
    transport: Arc<dyn HttpClient>,
    limiter: RateLimiter,
    timeout_ms: u64,
}

impl Session {
    pub fn new(
        domain: Domain,
        base_url: impl Into<String>,
        credential: AppKey,
        transport: Arc<dyn HttpClient>,
        limiter: RateLimiter,
        timeout: Duration,
    ) -> Self {
        Self {
            domain,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            credential,
            transport,
            limiter,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub const fn domain(&self) -> Domain {
        self.domain
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credential(&self) -> &AppKey {
        &self.credential
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Block until the domain's limiter grants one call.
    pub fn acquire_quota(&self) {
        let domain = self.domain;
        self.limiter.acquire(true, |wait| {
            debug!(
                domain = %domain,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for next window"
            );
        });
    }

    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.transport
            .execute(request.with_timeout_ms(self.timeout_ms))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("domain", &self.domain)
            .field("base_url", &self.base_url)
            .field("limiter", &self.limiter)
            .finish()
    }
}

/// Request with every injection applied, ready to be sent repeatedly.
#[derive(Debug)]
struct Prepared {
    method: HttpMethod,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<String>,
}

impl Prepared {
    fn to_http(&self) -> HttpRequest {
        let mut request = HttpRequest::new(self.method, self.url.clone());
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        match &self.body {
            Some(body) => request.with_body(body.clone()),
            None => request,
        }
    }
}

/// Executes vendor calls: quota, bearer token, retry on vendor codes.
#[derive(Debug)]
pub struct RequestEngine {
    sessions: Arc<DomainMap<Session>>,
    tokens: TokenManager,
    default_domain: Domain,
    quota_backoff: Duration,
}

impl RequestEngine {
    /// Build one session per configured domain over the given transports.
    pub fn new(
        config: &ClientConfig,
        real: Arc<dyn HttpClient>,
        virtual_: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, KisError> {
        let virtual_session = match (config.virtual_.as_ref(), virtual_) {
            (Some(credential), Some(transport)) => Some(Session::new(
                Domain::Virtual,
                config.base_url(Domain::Virtual),
                credential.clone(),
                transport,
                RateLimiter::from_policy(config.rate_limit(Domain::Virtual)),
                config.timeout(),
            )),
            (None, None) => None,
            (Some(_), None) => {
                return Err(KisError::configuration(
                    "virtual credentials are configured without a virtual transport",
                ))
            }
            (None, Some(_)) => {
                return Err(KisError::configuration(
                    "a virtual transport was supplied without virtual credentials",
                ))
            }
        };

        let real_session = Session::new(
            Domain::Real,
            config.base_url(Domain::Real),
            config.real.clone(),
            real,
            RateLimiter::from_policy(config.rate_limit(Domain::Real)),
            config.timeout(),
        );

        let sessions = Arc::new(DomainMap::new(real_session, virtual_session));
        let credentials = sessions.map(|_, session| session.credential().clone());
        let tokens = TokenManager::new(
            Arc::new(HttpTokenIssuer::new(
                Arc::clone(&sessions),
                config.quota_backoff(),
            )),
            credentials,
            config.token_cache_dir.clone().map(TokenStore::new),
            config.refresh_threshold(),
        );

        Ok(Self::with_tokens(sessions, tokens, config))
    }

    /// Assemble an engine around an existing token manager.
    pub fn with_tokens(
        sessions: Arc<DomainMap<Session>>,
        tokens: TokenManager,
        config: &ClientConfig,
    ) -> Self {
        let default_domain = if sessions.has_virtual() {
            config.default_domain()
        } else {
            Domain::Real
        };

        Self {
            sessions,
            tokens,
            default_domain,
            quota_backoff: config.quota_backoff(),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub const fn default_domain(&self) -> Domain {
        self.default_domain
    }

    pub fn session(&self, domain: Domain) -> Result<&Session, KisError> {
        self.sessions.get(domain).ok_or_else(|| {
            KisError::authentication(domain, "no credentials configured for this domain")
        })
    }

    /// Send `request`, absorbing quota and token-expiry vendor codes.
    pub fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, KisError> {
        let domain = request.domain.unwrap_or(self.default_domain);
        let session = self.session(domain)?;
        let prepared = prepare(session, request)?;
        let mut token_renewed = false;

        loop {
            session.acquire_quota();

            let mut http = prepared.to_http();
            if request.auth {
                let token = self.tokens.get_token(domain)?;
                http = http.with_header("authorization", token.authorization());
            }

            let response = session.send(http)?;
            if response.is_success() {
                return Ok(response);
            }

            let code = vendor_error_code(&response);
            if code.as_deref() == Some(QUOTA_EXCEEDED_CODE) {
                warn!(
                    domain = %domain,
                    endpoint = %request.path,
                    backoff_ms = self.quota_backoff.as_millis() as u64,
                    "vendor quota exceeded, retrying"
                );
                std::thread::sleep(self.quota_backoff);
                continue;
            }

            if code.as_deref() == Some(TOKEN_EXPIRED_CODE) && request.auth && !token_renewed {
                warn!(domain = %domain, endpoint = %request.path, "access token expired, re-issuing");
                self.tokens.invalidate(domain);
                token_renewed = true;
                continue;
            }

            return Err(KisError::VendorHttp {
                status: response.status,
                code,
                response: Box::new(response),
            });
        }
    }

    /// Execute and decode the JSON body into `T`.
    ///
    /// The returned value is not yet bound to a client.
    pub fn fetch<T: Materialized>(&self, request: &ApiRequest) -> Result<T, KisError> {
        let response = Arc::new(self.execute(request)?);
        let mut json = response.json().map_err(|e| DecodeError::NotAnObject {
            shape: T::schema().name(),
            found: format!("invalid JSON ({e})"),
        })?;

        let summary = ResponseSummary::from_json(&json);
        if !request.quiet {
            info!(
                endpoint = %request.path,
                params = ?request.params,
                rt_cd = summary.rt_cd.as_deref().unwrap_or(""),
                msg_cd = summary.msg_cd.as_deref().unwrap_or(""),
                msg = summary.message.as_deref().unwrap_or(""),
                "api response"
            );
        }

        if let Some(rt_cd) = summary.rt_cd.filter(|rt_cd| rt_cd != "0") {
            return Err(KisError::Api {
                rt_cd,
                msg_cd: summary.msg_cd.unwrap_or_default(),
                message: summary.message.unwrap_or_default(),
                response: Box::new(HttpResponse::clone(&response)),
            });
        }

        if let Value::Object(object) = &mut json {
            object.insert(
                RESPONSE_TAG.to_owned(),
                serde_json::json!({
                    "status": response.status,
                    "headers": response.headers,
                }),
            );
        }

        let mut value = materialize::<T>(&json, &[RESPONSE_TAG])?;
        value.attach_response(response);
        Ok(value)
    }
}

struct ResponseSummary {
    rt_cd: Option<String>,
    msg_cd: Option<String>,
    message: Option<String>,
}

impl ResponseSummary {
    fn from_json(json: &Value) -> Self {
        let field = |key: &str| {
            json.get(key).and_then(|value| match value {
                Value::String(text) => Some(text.trim().to_owned()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
        };

        Self {
            rt_cd: field("rt_cd"),
            msg_cd: field("msg_cd"),
            message: field("msg1"),
        }
    }
}

/// Vendor code from an error body; absent or non-JSON bodies carry none.
pub fn vendor_error_code(response: &HttpResponse) -> Option<String> {
    let json = response.json().ok()?;
    ["msg_cd", "error_code"]
        .into_iter()
        .find_map(|key| json.get(key).and_then(Value::as_str))
        .map(|code| code.trim().to_owned())
}

fn prepare(session: &Session, request: &ApiRequest) -> Result<Prepared, KisError> {
    let is_get = request.method == HttpMethod::Get;
    if is_get && request.body.is_some() {
        return Err(KisError::configuration(format!(
            "GET {} cannot carry a request body",
            request.path
        )));
    }
    if is_get && request.appkey_location == Some(AppKeyLocation::Body) {
        return Err(KisError::configuration(format!(
            "GET {} cannot send the appkey in the body",
            request.path
        )));
    }

    let mut headers = request.headers.clone();
    let mut params = request.params.clone();
    let mut body = request.body.clone().unwrap_or_default();

    let credential = session.credential();
    match request.appkey_location {
        Some(AppKeyLocation::Header) => {
            headers.insert(String::from("appkey"), credential.app_key().to_owned());
            headers.insert(String::from("appsecret"), credential.secret_key().to_owned());
        }
        Some(AppKeyLocation::Body) => {
            body.insert(String::from("appkey"), credential.app_key().to_owned());
            body.insert(String::from("appsecret"), credential.secret_key().to_owned());
        }
        None => {}
    }

    for injection in &request.injections {
        let target = injection.target.unwrap_or(if is_get {
            FormTarget::Params
        } else {
            FormTarget::Body
        });

        let form = match target {
            FormTarget::Header => &mut headers,
            FormTarget::Params => &mut params,
            FormTarget::Body if is_get => {
                return Err(KisError::configuration(format!(
                    "GET {} cannot receive body form fields",
                    request.path
                )))
            }
            FormTarget::Body => &mut body,
        };

        for (key, value) in &injection.entries {
            let key = match target {
                FormTarget::Header => key.to_ascii_lowercase(),
                _ => (*key).to_owned(),
            };
            if form.contains_key(&key) {
                return Err(KisError::configuration(format!(
                    "form key '{key}' is already set on {}",
                    request.path
                )));
            }
            form.insert(key, value.clone());
        }
    }

    let body = if is_get {
        None
    } else {
        Some(
            serde_json::to_string(&body)
                .map_err(|e| KisError::configuration(format!("unserializable body: {e}")))?,
        )
    };

    Ok(Prepared {
        method: request.method,
        url: HttpRequest::get(session.url(&request.path))
            .with_query(&params)
            .url,
        headers,
        body,
    })
}
