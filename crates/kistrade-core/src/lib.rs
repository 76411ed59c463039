//! # Kistrade Core
//!
//! Authenticated, throttled client runtime for the Korea Investment &
//! Securities open trading API.
//!
//! ## Overview
//!
//! - **Token lifecycle** per credential domain (real / virtual): issue, cache,
//!   refresh, persist and revoke
//! - **Fixed-window rate limiting** per domain
//! - **Request pipeline** with appkey and form injection, retrying on the
//!   vendor's quota-exceeded and token-expired codes
//! - **Descriptor-driven materializer** turning vendor JSON into typed values
//!   that carry a back-reference to their client
//! - **Expiring cache** shared by a client and its scopes
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Lock-guarded expiring key/value store |
//! | [`client`] | Client handle and owner back-reference target |
//! | [`config`] | Client settings and vendor constants |
//! | [`domain`] | Domains, credentials, account numbers, markets |
//! | [`error`] | Core error types |
//! | [`http_client`] | Blocking HTTP transport abstraction |
//! | [`materialize`] | JSON → typed graph transform and context binding |
//! | [`request`] | Request builder, form injection and retry loop |
//! | [`scope`] | Account and product scopes |
//! | [`throttling`] | Fixed-window rate limiter |
//! | [`token`] | Access token management |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kistrade_core::{AppKey, ApiRequest, ClientConfig, KisClient, ProductScope, Market};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ClientConfig::new(AppKey::from_env("KIS")?);
//!     if let Some(dir) = ClientConfig::default_token_cache_dir() {
//!         config = config.with_token_cache_dir(dir);
//!     }
//!     let client = KisClient::new(config)?;
//!
//!     let info = client.product("005930", Market::Krx).info()?;
//!     println!("{} listed on {}", info.name(), info.market());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use kistrade_core::KisError;
//!
//! fn handle_error(error: KisError) {
//!     match error {
//!         KisError::Configuration(_) => {
//!             // Fix the request
//!         }
//!         KisError::Api { msg_cd, .. } => {
//!             // Business-level rejection
//!             let _ = msg_cd;
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - `AppKey` and `AccessToken` have redacted `Debug` output
//! - Credentials only leave the process inside vendor requests and the token
//!   cache file

pub mod cache;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod materialize;
pub mod request;
pub mod scope;
pub mod throttling;
pub mod token;

// Caching
pub use cache::{CacheStore, Expiry};

// Client
pub use client::KisClient;

// Configuration
pub use config::{ClientConfig, RateLimitPolicy};

// Domain types
pub use domain::{AccountNumber, AppKey, Domain, DomainMap, Market, EXCHANGE_CODES};

// Error types
pub use error::KisError;

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};

// Materialization
pub use materialize::{
    materialize, BindContext, Binder, CodeTable, DecodeError, FieldDescriptor, FieldValue,
    Materialized, Owner, Record, Schema, Shape, TimeFormat, ValueTransform,
};

// Request pipeline
pub use request::{ApiRequest, AppKeyLocation, FormInjector, FormTarget, RequestEngine};

// Scopes
pub use scope::{
    AccountProductScope, AccountScope, HasAccount, HasProduct, ProductForm, ProductInfo,
    ProductScope,
};

// Throttling
pub use throttling::RateLimiter;

// Tokens
pub use token::{AccessToken, TokenIssuer, TokenManager, TokenStore};
