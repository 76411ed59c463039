use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::Span;

use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::domain::{AccountNumber, Domain, Market};
use crate::error::KisError;
use crate::http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
use crate::materialize::{BindContext, Binder, Materialized};
use crate::request::{ApiRequest, RequestEngine};
use crate::scope::{AccountScope, ProductScope};
use crate::token::{AccessToken, TokenManager};

/// Shared client state. Materialized values hold a weak reference to it.
pub struct ClientInner {
    config: ClientConfig,
    engine: RequestEngine,
    cache: CacheStore,
    span: Span,
}

/// Handle to one authenticated vendor client. Cheap to clone.
#[derive(Clone)]
pub struct KisClient {
    inner: Arc<ClientInner>,
}

impl KisClient {
    /// Client with one persistent reqwest session per configured domain.
    pub fn new(config: ClientConfig) -> Result<Self, KisError> {
        let headers = BTreeMap::from([
            (
                String::from("content-type"),
                String::from("application/json; charset=utf-8"),
            ),
            (String::from("custtype"), String::from("P")),
        ]);

        let real: Arc<dyn HttpClient> =
            Arc::new(ReqwestHttpClient::new(&headers, config.timeout())?);
        let virtual_ = match config.virtual_ {
            Some(_) => Some(
                Arc::new(ReqwestHttpClient::new(&headers, config.timeout())?) as Arc<dyn HttpClient>,
            ),
            None => None,
        };

        Self::with_transports(config, real, virtual_)
    }

    /// Client over caller-supplied transports.
    pub fn with_transports(
        config: ClientConfig,
        real: Arc<dyn HttpClient>,
        virtual_: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, KisError> {
        let engine = RequestEngine::new(&config, real, virtual_)?;
        let span = tracing::info_span!("kis_client", has_virtual = config.virtual_.is_some());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                engine,
                cache: CacheStore::new(),
                span,
            }),
        })
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn engine(&self) -> &RequestEngine {
        &self.inner.engine
    }

    pub fn tokens(&self) -> &TokenManager {
        self.inner.engine.tokens()
    }

    pub fn default_domain(&self) -> Domain {
        self.inner.engine.default_domain()
    }

    pub fn token(&self, domain: Domain) -> Result<Arc<AccessToken>, KisError> {
        self.tokens().get_token(domain)
    }

    pub fn revoke_token(&self, domain: Domain) -> Result<(), KisError> {
        let _entered = self.inner.span.enter();
        self.tokens().revoke(domain)
    }

    /// Raw vendor call.
    pub fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, KisError> {
        let _entered = self.inner.span.enter();
        self.inner.engine.execute(request)
    }

    /// Vendor call decoded into `T`, with this client bound into every
    /// materialized value of the result.
    pub fn fetch<T: Materialized>(&self, request: &ApiRequest) -> Result<T, KisError> {
        let _entered = self.inner.span.enter();
        let mut value = self.inner.engine.fetch::<T>(request)?;
        Binder::new(self).bind(&mut value);
        Ok(value)
    }

    /// Bind this client into an already materialized graph. Returns the number
    /// of values bound.
    pub fn bind<T: BindContext + ?Sized>(&self, value: &mut T) -> usize {
        let mut binder = Binder::new(self);
        value.bind_context(&mut binder);
        binder.visited()
    }

    /// Scope for the configured default account.
    pub fn account(&self) -> Result<AccountScope, KisError> {
        let account = self
            .config()
            .account
            .clone()
            .ok_or_else(|| KisError::configuration("no default account is configured"))?;
        Ok(self.account_of(account))
    }

    pub fn account_of(&self, account: AccountNumber) -> AccountScope {
        AccountScope::new(self.clone(), account)
    }

    pub fn product(&self, symbol: impl Into<String>, market: Market) -> ProductScope {
        ProductScope::new(self.clone(), symbol, market)
    }

    /// Whether both handles refer to the same client.
    pub fn ptr_eq(&self, other: &KisClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for KisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KisClient")
            .field("default_domain", &self.default_domain())
            .field("engine", &self.inner.engine)
            .field("cache", &self.inner.cache)
            .finish()
    }
}
