use thiserror::Error;

use crate::domain::Domain;
use crate::http_client::{HttpError, HttpResponse};
use crate::materialize::DecodeError;

/// Top-level error type for client operations.
///
/// Quota exhaustion and token expiry reported by the vendor never appear
/// here: the request engine absorbs both inside its retry loop.
#[derive(Debug, Error)]
pub enum KisError {
    /// Invalid combination of request options or client settings. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing credentials, or token issuance/revocation rejected.
    #[error("authentication failed for {domain} domain: {message}")]
    Authentication {
        domain: Domain,
        code: Option<String>,
        message: String,
    },

    /// Non-success HTTP response with a vendor code the engine does not retry.
    #[error("vendor returned HTTP {status} (code {})", .code.as_deref().unwrap_or("none"))]
    VendorHttp {
        status: u16,
        code: Option<String>,
        response: Box<HttpResponse>,
    },

    /// HTTP success carrying a non-zero vendor return code.
    #[error("api error [{msg_cd}] {message} (rt_cd {rt_cd})")]
    Api {
        rt_cd: String,
        msg_cd: String,
        message: String,
        response: Box<HttpResponse>,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(#[from] HttpError),
}

impl KisError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn authentication(domain: Domain, message: impl Into<String>) -> Self {
        Self::Authentication {
            domain,
            code: None,
            message: message.into(),
        }
    }

    /// Raw response attached to vendor-originated errors.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::VendorHttp { response, .. } | Self::Api { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Vendor message code, when the failure originated from a vendor payload.
    pub fn vendor_code(&self) -> Option<&str> {
        match self {
            Self::VendorHttp { code, .. } | Self::Authentication { code, .. } => code.as_deref(),
            Self::Api { msg_cd, .. } => Some(msg_cd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_http_error_exposes_code_and_response() {
        let error = KisError::VendorHttp {
            status: 500,
            code: Some(String::from("EGW00999")),
            response: Box::new(HttpResponse::new(500, "{}")),
        };

        assert_eq!(error.vendor_code(), Some("EGW00999"));
        assert_eq!(error.response().map(|r| r.status), Some(500));
        assert!(error.to_string().contains("EGW00999"));
    }

    #[test]
    fn configuration_error_has_no_response() {
        let error = KisError::configuration("GET requests cannot carry a body");
        assert!(error.response().is_none());
        assert!(error.vendor_code().is_none());
    }
}
