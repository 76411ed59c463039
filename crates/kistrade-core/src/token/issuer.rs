use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::{QUOTA_EXCEEDED_CODE, TOKEN_ISSUE_PATH, TOKEN_REVOKE_PATH};
use crate::domain::{Domain, DomainMap};
use crate::error::KisError;
use crate::http_client::{HttpRequest, HttpResponse};
use crate::materialize::materialize;
use crate::request::{vendor_error_code, Session};

use super::AccessToken;

/// Token issuance and revocation collaborator.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, domain: Domain) -> Result<AccessToken, KisError>;

    fn revoke(&self, domain: Domain, token: &AccessToken) -> Result<(), KisError>;
}

/// Issues tokens through the vendor OAuth endpoints on each domain's session.
///
/// Token calls draw from the same per-domain quota as API calls, and a
/// quota-exceeded answer is retried after `quota_backoff` like any request.
pub struct HttpTokenIssuer {
    sessions: Arc<DomainMap<Session>>,
    quota_backoff: Duration,
}

impl HttpTokenIssuer {
    pub fn new(sessions: Arc<DomainMap<Session>>, quota_backoff: Duration) -> Self {
        Self {
            sessions,
            quota_backoff,
        }
    }

    fn session(&self, domain: Domain) -> Result<&Session, KisError> {
        self.sessions.get(domain).ok_or_else(|| {
            KisError::authentication(domain, "no credentials configured for this domain")
        })
    }

    fn post(&self, domain: Domain, path: &str, body: Value) -> Result<Value, KisError> {
        let session = self.session(domain)?;
        let body = body.to_string();

        loop {
            session.acquire_quota();
            let request = HttpRequest::post(session.url(path)).with_body(body.clone());
            let response = session.send(request)?;

            if vendor_error_code(&response).as_deref() == Some(QUOTA_EXCEEDED_CODE) {
                warn!(
                    domain = %domain,
                    path,
                    backoff_ms = self.quota_backoff.as_millis() as u64,
                    "token endpoint quota exceeded, retrying"
                );
                std::thread::sleep(self.quota_backoff);
                continue;
            }

            return token_endpoint_json(domain, &response);
        }
    }
}

impl TokenIssuer for HttpTokenIssuer {
    fn issue(&self, domain: Domain) -> Result<AccessToken, KisError> {
        let credential = self.session(domain)?.credential();
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": credential.app_key(),
            "appsecret": credential.secret_key(),
        });

        let json = self.post(domain, TOKEN_ISSUE_PATH, body)?;
        let token = materialize::<AccessToken>(&json, &[])?;
        debug!(domain = %domain, expires_at = %token.expires_at(), "issued access token");
        Ok(token)
    }

    fn revoke(&self, domain: Domain, token: &AccessToken) -> Result<(), KisError> {
        let credential = self.session(domain)?.credential();
        let body = json!({
            "appkey": credential.app_key(),
            "appsecret": credential.secret_key(),
            "token": token.token(),
        });

        self.post(domain, TOKEN_REVOKE_PATH, body)?;
        debug!(domain = %domain, "revoked access token");
        Ok(())
    }
}

/// Token endpoints report failures as `error_code` / `error_description`.
fn token_endpoint_json(domain: Domain, response: &HttpResponse) -> Result<Value, KisError> {
    let json = response.json().ok();
    let field = |key: &str| {
        json.as_ref()
            .and_then(|json| json.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    let code = field("error_code");
    if response.is_success() && code.is_none() {
        return json.ok_or_else(|| {
            KisError::authentication(domain, "token endpoint returned a non-JSON body")
        });
    }

    let message = field("error_description")
        .or_else(|| field("msg1"))
        .unwrap_or_else(|| format!("token endpoint returned HTTP {}", response.status));

    Err(KisError::Authentication {
        domain,
        code: code.or_else(|| field("msg_cd")),
        message,
    })
}
