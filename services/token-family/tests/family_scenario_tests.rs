//! End-to-end scenarios for refresh token families.

use rust_common::CacheClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use token_family_service::events::MemoryEventSink;
use token_family_service::jwt::{RefreshClaims, TokenCodec, TokenPayload, VerificationKeys};
use token_family_service::refresh::{reasons, FamilyState, TokenFamilyService, ValidationReason};
use token_family_service::{Config, SecurityEventType, Severity, StoreFailureMode};

const PRIMARY: &str = "primary-secret-0123456789abcdefghij";
const OLD: &str = "old-secret-0123456789abcdefghijklmnop";

fn config(vars: &[(&str, &str)]) -> Config {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_lookup(|name| map.get(name).cloned()).unwrap()
}

fn codec(secrets: &[&str]) -> TokenCodec {
    let keys = VerificationKeys::new(secrets.iter().map(|s| s.as_bytes())).unwrap();
    TokenCodec::new(keys, "intellifill", Duration::from_secs(604_800))
}

fn service_with_sink() -> (TokenFamilyService, Arc<MemoryEventSink>) {
    let sink = Arc::new(MemoryEventSink::new());
    let service = TokenFamilyService::from_config(&config(&[("JWT_REFRESH_SECRET", PRIMARY)]))
        .unwrap()
        .with_event_sink(sink.clone());
    (service, sink)
}

fn unreachable_store(mode: &str) -> Config {
    config(&[
        ("JWT_REFRESH_SECRET", PRIMARY),
        ("REDIS_URL", "redis://127.0.0.1:1"),
        ("CACHE_OPERATION_TIMEOUT_MS", "200"),
        ("TOKEN_STORE_FAILURE_MODE", mode),
    ])
}

#[tokio::test]
async fn test_replay_of_rotated_token_revokes_family() {
    let (service, sink) = service_with_sink();

    let login = service.create_new_family("user-1").await.unwrap();
    let second = service.rotate_token(&login.refresh_token).await.unwrap();
    let third = service.rotate_token(&second.refresh_token).await.unwrap();
    assert_eq!(third.generation, 3);

    let replay = service.validate_token(&second.refresh_token).await;
    assert!(!replay.valid);
    assert!(replay.token_reused);
    assert!(replay.family_revoked);
    assert_eq!(replay.reason, Some(ValidationReason::TokenReused));

    assert!(service.rotate_token(&third.refresh_token).await.is_none());

    let hijacks = sink.of_type(SecurityEventType::SessionHijackAttempt).await;
    assert_eq!(hijacks.len(), 1);
    assert_eq!(hijacks[0].severity, Severity::Critical);
    assert_eq!(hijacks[0].user_id.as_deref(), Some("user-1"));
    assert_eq!(hijacks[0].family_id.as_deref(), Some(login.family_id.as_str()));
}

#[tokio::test]
async fn test_other_families_unaffected_by_reuse() {
    let (service, _) = service_with_sink();

    let laptop = service.create_new_family("user-1").await.unwrap();
    let phone = service.create_new_family("user-1").await.unwrap();
    service.rotate_token(&laptop.refresh_token).await.unwrap();
    service.rotate_token(&laptop.refresh_token).await;

    assert_eq!(
        service.family_state(&laptop.family_id).await.unwrap(),
        FamilyState::Revoked
    );
    assert!(service.validate_token(&phone.refresh_token).await.valid);
}

#[tokio::test]
async fn test_expired_token_reason() {
    let (service, _) = service_with_sink();
    let payload = TokenPayload::new("user-1", "family-1", 1);
    let issued_at = chrono::Utc::now().timestamp() - 700_000;
    let claims = RefreshClaims::issued_at(&payload, "intellifill", issued_at, 604_800);
    let token = codec(&[PRIMARY]).encode_claims(&claims).unwrap();

    let result = service.validate_token(&token).await;
    assert!(!result.valid);
    assert_eq!(result.reason, Some(ValidationReason::Expired));
    assert_eq!(result.reason.unwrap().to_string(), "Token expired");
    assert!(service.rotate_token(&token).await.is_none());
}

#[tokio::test]
async fn test_garbage_and_foreign_tokens() {
    let (service, _) = service_with_sink();

    let result = service.validate_token("not-a-jwt").await;
    assert_eq!(result.reason, Some(ValidationReason::Malformed));

    let foreign = codec(&["foreign-secret-0123456789abcdefghijk"])
        .sign(&TokenPayload::new("user-1", "family-1", 1))
        .unwrap();
    let result = service.validate_token(&foreign).await;
    assert_eq!(result.reason, Some(ValidationReason::InvalidSignature));
}

#[tokio::test]
async fn test_old_secret_rotates_onto_primary() {
    let cache = Arc::new(CacheClient::in_memory("auth"));
    let before = TokenFamilyService::new(codec(&[OLD]), cache.clone(), "salt");
    let after = TokenFamilyService::new(codec(&[PRIMARY, OLD]), cache, "salt");

    let login = before.create_new_family("user-1").await.unwrap();
    let rotated = after.rotate_token(&login.refresh_token).await.unwrap();
    assert_eq!(rotated.generation, 2);

    let primary_only = codec(&[PRIMARY]);
    assert!(matches!(
        primary_only.verify(&rotated.refresh_token),
        token_family_service::jwt::VerifyOutcome::Valid { key_position: 0, .. }
    ));

    let replay = after.validate_token(&login.refresh_token).await;
    assert!(replay.token_reused);
}

#[tokio::test]
async fn test_old_secret_from_config() {
    let login = TokenFamilyService::new(codec(&[OLD]), Arc::new(CacheClient::in_memory("auth")), "salt")
        .create_new_family("user-1")
        .await
        .unwrap();

    let service = TokenFamilyService::from_config(&config(&[
        ("JWT_REFRESH_SECRET", PRIMARY),
        ("JWT_REFRESH_SECRET_OLD", OLD),
    ]))
    .unwrap();
    assert!(service.validate_token(&login.refresh_token).await.valid);
}

#[tokio::test]
async fn test_revoke_family_twice() {
    let (service, sink) = service_with_sink();
    let login = service.create_new_family("user-1").await.unwrap();

    service.revoke_family(&login.family_id, "user-1", reasons::LOGOUT).await;
    service.revoke_family(&login.family_id, "user-1", reasons::LOGOUT).await;

    assert_eq!(
        service.family_state(&login.family_id).await.unwrap(),
        FamilyState::Revoked
    );
    assert_eq!(sink.of_type(SecurityEventType::FamilyRevoked).await.len(), 1);

    let result = service.validate_token(&login.refresh_token).await;
    assert!(result.family_revoked);
    assert!(!result.token_reused);
    assert_eq!(sink.of_type(SecurityEventType::TokenRevoked).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redemptions_rotate_once() {
    const RACERS: usize = 8;
    let (service, sink) = service_with_sink();
    let service = Arc::new(service);
    let login = service.create_new_family("user-1").await.unwrap();
    let barrier = Arc::new(tokio::sync::Barrier::new(RACERS));

    let racers: Vec<_> = (0..RACERS)
        .map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            let token = login.refresh_token.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                service.rotate_token(&token).await
            })
        })
        .collect();

    let mut rotated = Vec::new();
    for racer in racers {
        if let Some(issued) = racer.await.unwrap() {
            rotated.push(issued);
        }
    }

    assert_eq!(rotated.len(), 1);
    assert_eq!(rotated[0].generation, 2);
    assert_eq!(
        service.family_state(&login.family_id).await.unwrap(),
        FamilyState::Revoked
    );
    assert!(!sink
        .of_type(SecurityEventType::SessionHijackAttempt)
        .await
        .is_empty());
    assert_eq!(sink.of_type(SecurityEventType::FamilyRevoked).await.len(), 1);
}

fn bounded_store(size: &str, mode: &str) -> Config {
    config(&[
        ("JWT_REFRESH_SECRET", PRIMARY),
        ("CACHE_LOCAL_SIZE", size),
        ("TOKEN_STORE_FAILURE_MODE", mode),
    ])
}

#[tokio::test]
async fn test_logins_do_not_crowd_out_revocations() {
    let sink = Arc::new(MemoryEventSink::new());
    let service = TokenFamilyService::from_config(&bounded_store("4", "fail_open"))
        .unwrap()
        .with_event_sink(sink.clone());

    let victim = service.create_new_family("victim").await.unwrap();
    let descendant = service.rotate_token(&victim.refresh_token).await.unwrap();
    for i in 0..8 {
        service.create_new_family(&format!("other-{i}")).await.unwrap();
    }

    let replay = service.validate_token(&victim.refresh_token).await;
    assert!(!replay.valid);
    assert!(replay.token_reused);
    assert!(replay.family_revoked);

    let after = service.validate_token(&descendant.refresh_token).await;
    assert!(!after.valid);
    assert!(after.family_revoked);
    assert_eq!(after.reason, Some(ValidationReason::FamilyRevoked));
    assert!(service.rotate_token(&descendant.refresh_token).await.is_none());

    assert!(sink.of_type(SecurityEventType::TokenStoreDegraded).await.is_empty());
    assert_eq!(sink.of_type(SecurityEventType::FamilyRevoked).await.len(), 1);
}

/// Fill a four-entry store with used-token records so that the revocation
/// triggered by a replay cannot be written, then check the descendant.
async fn assert_refused_revocation_still_revokes(mode: &str) {
    let sink = Arc::new(MemoryEventSink::new());
    let service = TokenFamilyService::from_config(&bounded_store("4", mode))
        .unwrap()
        .with_event_sink(sink.clone());

    let victim = service.create_new_family("victim").await.unwrap();
    let descendant = service.rotate_token(&victim.refresh_token).await.unwrap();
    for i in 0..4 {
        let login = service.create_new_family(&format!("other-{i}")).await.unwrap();
        service.rotate_token(&login.refresh_token).await;
    }

    let replay = service.validate_token(&victim.refresh_token).await;
    assert!(!replay.valid);
    assert!(replay.token_reused);
    assert!(replay.family_revoked);

    let after = service.validate_token(&descendant.refresh_token).await;
    assert!(!after.valid);
    assert!(after.family_revoked);
    assert_eq!(after.reason, Some(ValidationReason::FamilyRevoked));
    assert!(service.rotate_token(&descendant.refresh_token).await.is_none());

    assert_eq!(
        service.family_state(&victim.family_id).await.unwrap(),
        FamilyState::Revoked
    );
    let record = service.revocation(&victim.family_id).await.unwrap().unwrap();
    assert_eq!(record.reason, reasons::TOKEN_REUSE);

    let degraded = sink.of_type(SecurityEventType::TokenStoreDegraded).await;
    assert!(degraded
        .iter()
        .any(|event| event.details["check"] == "revoked_family.revoke"
            && event.details["heldInProcess"] == true));
}

#[tokio::test]
async fn test_refused_revocation_still_revokes_descendants_fail_open() {
    assert_refused_revocation_still_revokes("fail_open").await;
}

#[tokio::test]
async fn test_refused_revocation_still_revokes_descendants_fail_closed() {
    assert_refused_revocation_still_revokes("fail_closed").await;
}

#[tokio::test]
async fn test_full_local_store_refuses_rotation_when_fail_closed() {
    let service = TokenFamilyService::from_config(&bounded_store("2", "fail_closed")).unwrap();

    for user in ["user-1", "user-2"] {
        let login = service.create_new_family(user).await.unwrap();
        assert!(service.rotate_token(&login.refresh_token).await.is_some());
    }

    let third = service.create_new_family("user-3").await.unwrap();
    assert!(service.rotate_token(&third.refresh_token).await.is_none());
    assert!(service.validate_token(&third.refresh_token).await.valid);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let sink = Arc::new(MemoryEventSink::new());
    let service = TokenFamilyService::from_config(&unreachable_store("fail_open"))
        .unwrap()
        .with_event_sink(sink.clone());

    let login = service.create_new_family("user-1").await.unwrap();
    let result = service.validate_token(&login.refresh_token).await;
    assert!(result.valid);

    let degraded = sink.of_type(SecurityEventType::TokenStoreDegraded).await;
    assert_eq!(degraded.len(), 2);

    let rotated = service.rotate_token(&login.refresh_token).await.unwrap();
    assert_eq!(rotated.generation, 2);

    let forged = codec(&["foreign-secret-0123456789abcdefghijk"])
        .sign(&TokenPayload::new("user-1", &login.family_id, 2))
        .unwrap();
    assert_eq!(
        service.validate_token(&forged).await.reason,
        Some(ValidationReason::InvalidSignature)
    );
}

#[tokio::test]
async fn test_unreachable_store_fails_closed() {
    let config = unreachable_store("fail_closed");
    assert_eq!(config.store_failure_mode, StoreFailureMode::FailClosed);
    let service = TokenFamilyService::from_config(&config).unwrap();

    let login = service.create_new_family("user-1").await.unwrap();
    let result = service.validate_token(&login.refresh_token).await;
    assert!(!result.valid);
    assert_eq!(result.reason, Some(ValidationReason::StoreUnavailable));
    assert!(service.rotate_token(&login.refresh_token).await.is_none());
}

#[tokio::test]
async fn test_revoke_with_unreachable_store_is_held_in_process() {
    let service = TokenFamilyService::from_config(&unreachable_store("fail_open")).unwrap();
    service
        .revoke_family("family-1", "user-1", reasons::LOGOUT)
        .await;

    assert_eq!(
        service.family_state("family-1").await.unwrap(),
        FamilyState::Revoked
    );
    assert!(service.family_state("family-2").await.is_err());
}
