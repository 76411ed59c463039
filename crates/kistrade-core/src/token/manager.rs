use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use crate::domain::{AppKey, Domain, DomainMap};
use crate::error::KisError;

use super::{AccessToken, TokenIssuer, TokenStore};

type Slot = Mutex<Option<Arc<AccessToken>>>;

/// Per-domain access token owner.
///
/// Each domain has its own lock, held across issuance so concurrent callers
/// wait for an in-flight refresh instead of issuing a duplicate.
pub struct TokenManager {
    issuer: Arc<dyn TokenIssuer>,
    credentials: DomainMap<AppKey>,
    slots: DomainMap<Slot>,
    store: Option<TokenStore>,
    refresh_threshold: Duration,
}

impl TokenManager {
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        credentials: DomainMap<AppKey>,
        store: Option<TokenStore>,
        refresh_threshold: Duration,
    ) -> Self {
        let slots = credentials.map(|_, _| Mutex::new(None));
        Self {
            issuer,
            credentials,
            slots,
            store,
            refresh_threshold,
        }
    }

    pub const fn refresh_threshold(&self) -> Duration {
        self.refresh_threshold
    }

    pub fn store(&self) -> Option<&TokenStore> {
        self.store.as_ref()
    }

    /// A token with at least the refresh threshold left, issuing one if needed.
    ///
    /// Before issuing, a persisted token written by another process with the
    /// same credentials is adopted if it is still fresh.
    pub fn get_token(&self, domain: Domain) -> Result<Arc<AccessToken>, KisError> {
        let mut slot = self.lock(domain)?;

        if let Some(token) = slot.as_ref().filter(|token| self.is_fresh(token)) {
            return Ok(Arc::clone(token));
        }

        if let Some(token) = self.load(domain).filter(|token| self.is_fresh(token)) {
            debug!(domain = %domain, "adopted persisted access token");
            let token = Arc::new(token);
            *slot = Some(Arc::clone(&token));
            return Ok(token);
        }

        let token = Arc::new(self.issuer.issue(domain)?);
        self.persist(domain, &token);
        info!(domain = %domain, expires_at = %token.expires_at(), "access token refreshed");

        *slot = Some(Arc::clone(&token));
        Ok(token)
    }

    /// Replace the cached token, persisting it when enabled.
    pub fn set_token(&self, domain: Domain, token: AccessToken) -> Result<(), KisError> {
        let mut slot = self.lock(domain)?;
        self.persist(domain, &token);
        *slot = Some(Arc::new(token));
        Ok(())
    }

    /// Cached token without refreshing.
    pub fn cached(&self, domain: Domain) -> Option<Arc<AccessToken>> {
        let slot = self.lock(domain).ok()?;
        slot.clone()
    }

    /// Revoke the cached token with the vendor and forget it.
    ///
    /// The token is dropped locally even when the vendor call fails.
    pub fn revoke(&self, domain: Domain) -> Result<(), KisError> {
        let mut slot = self.lock(domain)?;
        let Some(token) = slot.take() else {
            return Ok(());
        };

        self.forget_persisted(domain);
        self.issuer.revoke(domain, &token)
    }

    /// Drop the cached and persisted token so the next fetch re-issues.
    pub fn invalidate(&self, domain: Domain) {
        if let Ok(mut slot) = self.lock(domain) {
            *slot = None;
        }
        self.forget_persisted(domain);
    }

    fn is_fresh(&self, token: &AccessToken) -> bool {
        token.remaining() >= self.refresh_threshold
    }

    fn lock(&self, domain: Domain) -> Result<MutexGuard<'_, Option<Arc<AccessToken>>>, KisError> {
        self.slots
            .get(domain)
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| {
                KisError::authentication(domain, "no credentials configured for this domain")
            })
    }

    fn load(&self, domain: Domain) -> Option<AccessToken> {
        let store = self.store.as_ref()?;
        store.load(self.credentials.get(domain)?, domain)
    }

    fn persist(&self, domain: Domain, token: &AccessToken) {
        if let (Some(store), Some(credential)) = (&self.store, self.credentials.get(domain)) {
            store.save(credential, domain, token);
        }
    }

    fn forget_persisted(&self, domain: Domain) {
        if let (Some(store), Some(credential)) = (&self.store, self.credentials.get(domain)) {
            store.remove(credential, domain);
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("virtual", &self.credentials.has_virtual())
            .field("store", &self.store)
            .field("refresh_threshold", &self.refresh_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use time::OffsetDateTime;

    use super::*;

    struct CountingIssuer {
        issued: AtomicUsize,
        revoked: AtomicUsize,
        validity: time::Duration,
    }

    impl CountingIssuer {
        fn new(validity: time::Duration) -> Arc<Self> {
            Arc::new(Self {
                issued: AtomicUsize::new(0),
                revoked: AtomicUsize::new(0),
                validity,
            })
        }
    }

    impl TokenIssuer for CountingIssuer {
        fn issue(&self, _domain: Domain) -> Result<AccessToken, KisError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken::new(
                format!("token-{n}"),
                "Bearer",
                OffsetDateTime::now_utc() + self.validity,
                self.validity.whole_seconds(),
            ))
        }

        fn revoke(&self, _domain: Domain, _token: &AccessToken) -> Result<(), KisError> {
            self.revoked.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(issuer: Arc<CountingIssuer>, store: Option<TokenStore>) -> TokenManager {
        TokenManager::new(
            issuer,
            DomainMap::new(AppKey::new("id", "key", "secret"), None),
            store,
            Duration::from_secs(600),
        )
    }

    #[test]
    fn second_call_returns_cached_instance() {
        let issuer = CountingIssuer::new(time::Duration::days(1));
        let tokens = manager(Arc::clone(&issuer), None);

        let first = tokens.get_token(Domain::Real).expect("issues");
        let second = tokens.get_token(Domain::Real).expect("cached");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn token_inside_refresh_threshold_is_reissued() {
        let issuer = CountingIssuer::new(time::Duration::minutes(5));
        let tokens = manager(Arc::clone(&issuer), None);

        tokens.get_token(Domain::Real).expect("issues");
        let refreshed = tokens.get_token(Domain::Real).expect("reissues");

        assert_eq!(refreshed.token(), "token-2");
    }

    #[test]
    fn unconfigured_virtual_domain_is_an_authentication_error() {
        let tokens = manager(CountingIssuer::new(time::Duration::days(1)), None);

        let err = tokens.get_token(Domain::Virtual).expect_err("no virtual key");
        assert!(matches!(
            err,
            KisError::Authentication {
                domain: Domain::Virtual,
                ..
            }
        ));
    }

    #[test]
    fn revoke_clears_token_and_calls_issuer_once() {
        let issuer = CountingIssuer::new(time::Duration::days(1));
        let tokens = manager(Arc::clone(&issuer), None);
        tokens.get_token(Domain::Real).expect("issues");

        tokens.revoke(Domain::Real).expect("revokes");
        tokens.revoke(Domain::Real).expect("nothing left to revoke");

        assert!(tokens.cached(Domain::Real).is_none());
        assert_eq!(issuer.revoked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persisted_token_is_adopted_by_a_fresh_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        let issuer = CountingIssuer::new(time::Duration::days(1));

        let first = manager(Arc::clone(&issuer), Some(TokenStore::new(dir.path())));
        let issued = first.get_token(Domain::Real).expect("issues");

        let second = manager(Arc::clone(&issuer), Some(TokenStore::new(dir.path())));
        let adopted = second.get_token(Domain::Real).expect("loads");

        assert_eq!(adopted.token(), issued.token());
        assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_removes_persisted_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path());
        let path = store.path(&AppKey::new("id", "key", "secret"), Domain::Real);
        let tokens = manager(CountingIssuer::new(time::Duration::days(1)), Some(store));

        tokens.get_token(Domain::Real).expect("issues");
        assert!(path.exists());

        tokens.invalidate(Domain::Real);
        assert!(!path.exists());
        assert!(tokens.cached(Domain::Real).is_none());
    }
}
