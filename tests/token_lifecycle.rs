//! Behavior-driven tests for access token lifecycle
//!
//! These tests verify HOW tokens are decoded, cached, persisted, shared
//! between clients and revoked.

mod support;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kistrade_core::materialize::VENDOR_DATETIME;
use kistrade_core::{
    materialize, AccessToken, DecodeError, Domain, KisError, TokenStore,
};
use serde_json::json;
use support::{client, client_with, config, real_key, RecordingHttpClient, REVOKE_PATH};

// =============================================================================
// Token Decoding
// =============================================================================

#[test]
fn when_vendor_token_json_is_decoded_fields_and_validity_are_exposed() {
    // Given: The vendor's token response
    let json = json!({
        "access_token": "T",
        "token_type": "Bearer",
        "access_token_token_expired": "2030-01-01 00:00:00",
        "expires_in": 86400
    });

    // When: It is materialized
    let token: AccessToken = materialize(&json, &[]).expect("token decodes");

    // Then: Every field is populated and the token is live
    assert_eq!(token.token(), "T");
    assert_eq!(token.token_type(), "Bearer");
    assert_eq!(token.validity_secs(), 86_400);
    assert!(!token.expired());
    assert!(token.remaining() > Duration::ZERO);
}

#[test]
fn when_access_token_is_missing_decoding_fails_naming_the_field() {
    // Given: A token response without access_token
    let json = json!({
        "token_type": "Bearer",
        "access_token_token_expired": "2030-01-01 00:00:00",
        "expires_in": 86400
    });

    // When: It is materialized
    let err = materialize::<AccessToken>(&json, &[]).expect_err("must fail");

    // Then: The error points at the missing source key
    match err {
        DecodeError::MissingField { field, path, .. } => {
            assert_eq!(field, "token");
            assert_eq!(path, "access_token");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn when_expiry_is_unparseable_decoding_fails_instead_of_defaulting() {
    let json = json!({
        "access_token": "T",
        "access_token_token_expired": "tomorrow",
        "expires_in": 86400
    });

    let err = materialize::<AccessToken>(&json, &[]).expect_err("must fail");

    assert_eq!(err.field(), Some("expires_at"));
    assert_eq!(err.raw(), Some("tomorrow"));
}

// =============================================================================
// Token Persistence
// =============================================================================

#[test]
fn when_token_is_saved_and_reloaded_it_is_identical() {
    // Given: A token and a store in a temporary directory
    let dir = tempfile::tempdir().expect("tempdir");
    let store = TokenStore::new(dir.path());
    let token = AccessToken::new(
        "persisted-token",
        "Bearer",
        VENDOR_DATETIME.parse("2031-03-04 05:06:07").expect("parses"),
        86_400,
    );

    // When: It is saved and loaded back
    store.save(&real_key(), Domain::Real, &token);
    let reloaded = store.load(&real_key(), Domain::Real).expect("file exists");

    // Then: Field-for-field identical
    assert_eq!(reloaded.token(), token.token());
    assert_eq!(reloaded.token_type(), token.token_type());
    assert_eq!(reloaded.expires_at(), token.expires_at());
    assert_eq!(reloaded.validity_secs(), token.validity_secs());
}

#[test]
fn when_two_clients_share_a_cache_dir_the_second_reuses_the_token() {
    // Given: Two clients with identical credentials and one cache directory
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingHttpClient::new();
    let first = client_with(config().with_token_cache_dir(dir.path()), &transport);
    let second = client_with(config().with_token_cache_dir(dir.path()), &transport);

    // When: Both ask for a token
    let issued = first.token(Domain::Real).expect("issues");
    let adopted = second.token(Domain::Real).expect("loads from file");

    // Then: Only one issuance reached the vendor
    assert_eq!(adopted.token(), issued.token());
    assert_eq!(transport.tokens_issued(), 1);
}

#[test]
fn when_cache_dir_is_set_the_issued_token_is_written_to_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingHttpClient::new();
    let client = client_with(config().with_token_cache_dir(dir.path()), &transport);

    client.token(Domain::Real).expect("issues");

    let store = client.tokens().store().expect("persistence enabled");
    assert!(store.path(&real_key(), Domain::Real).exists());
    assert!(!store.path(&real_key(), Domain::Virtual).exists());
}

#[test]
fn when_cache_dir_is_unset_persistence_is_disabled() {
    let transport = RecordingHttpClient::new();
    let client = client(&transport);

    client.token(Domain::Real).expect("issues");

    assert!(client.tokens().store().is_none());
}

// =============================================================================
// Token Caching
// =============================================================================

#[test]
fn when_token_is_requested_twice_only_one_issuance_happens() {
    // Given: A client with no token yet
    let transport = RecordingHttpClient::new();
    let client = client(&transport);

    // When: The token is requested twice in quick succession
    let first = client.token(Domain::Real).expect("issues");
    let second = client.token(Domain::Real).expect("cached");

    // Then: The same instance is returned after one network call
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.tokens_issued(), 1);
}

#[test]
fn when_many_threads_request_a_token_concurrently_one_issuance_happens() {
    // Given: A shared client
    let transport = RecordingHttpClient::new();
    let client = client(&transport);

    // When: Eight threads race for the token
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            thread::spawn(move || client.token(Domain::Real).expect("token"))
        })
        .collect();
    let tokens: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread should not panic"))
        .collect();

    // Then: Every thread saw the single issued token
    assert_eq!(transport.tokens_issued(), 1);
    assert!(tokens.iter().all(|token| token.token() == "token-1"));
}

#[test]
fn when_token_is_set_explicitly_no_issuance_happens() {
    let transport = RecordingHttpClient::new();
    let client = client(&transport);
    let token = AccessToken::new(
        "manual",
        "Bearer",
        VENDOR_DATETIME.parse("2099-01-01 00:00:00").expect("parses"),
        86_400,
    );

    client
        .tokens()
        .set_token(Domain::Real, token)
        .expect("real domain exists");

    assert_eq!(client.token(Domain::Real).expect("cached").token(), "manual");
    assert_eq!(transport.tokens_issued(), 0);
}

// =============================================================================
// Token Revocation
// =============================================================================

#[test]
fn when_token_is_revoked_the_next_request_reissues() {
    // Given: A client holding a token
    let transport = RecordingHttpClient::new();
    let client = client(&transport);
    client.token(Domain::Real).expect("issues");

    // When: The token is revoked
    client.revoke_token(Domain::Real).expect("revokes");

    // Then: The vendor saw the revocation and the next fetch re-issues
    let revocations = transport.requests_to(REVOKE_PATH);
    assert_eq!(revocations.len(), 1);
    let body: serde_json::Value = serde_json::from_str(
        revocations[0].body.as_deref().expect("revoke has a body"),
    )
    .expect("json body");
    assert_eq!(body["token"], "token-1");
    assert_eq!(body["appkey"], "PSrealkey");

    assert!(client.tokens().cached(Domain::Real).is_none());
    assert_eq!(client.token(Domain::Real).expect("reissues").token(), "token-2");
}

#[test]
fn when_nothing_is_cached_revoke_is_a_no_op() {
    let transport = RecordingHttpClient::new();
    let client = client(&transport);

    client.revoke_token(Domain::Real).expect("nothing to revoke");

    assert!(transport.requests_to(REVOKE_PATH).is_empty());
}

#[test]
fn when_virtual_token_is_requested_without_credentials_authentication_fails() {
    let transport = RecordingHttpClient::new();
    let client = client(&transport);

    assert!(matches!(
        client.token(Domain::Virtual),
        Err(KisError::Authentication { .. })
    ));
}
