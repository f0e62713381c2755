//! Property-based tests for the refresh token codec.
//!
//! Property 1: Signed payloads verify back to the same payload
//! Property 2: Verification tries every configured key in order
//! Property 3: Tampered and foreign tokens never verify
//! Property 4: Expiry is reported regardless of signing key

use proptest::prelude::*;
use std::time::Duration;
use token_family_service::jwt::{RefreshClaims, TokenCodec, TokenPayload, VerificationKeys, VerifyOutcome};

const PRIMARY: &[u8] = b"primary-secret-0123456789abcdefghij";
const OLD: &[u8] = b"old-secret-0123456789abcdefghijklmnop";
const FOREIGN: &[u8] = b"foreign-secret-0123456789abcdefghijk";

fn codec(secrets: &[&'static [u8]]) -> TokenCodec {
    let keys = VerificationKeys::new(secrets.iter().copied()).unwrap();
    TokenCodec::new(keys, "intellifill", Duration::from_secs(604_800))
}

/// Generate arbitrary user IDs.
fn arb_user_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,64}".prop_map(|s| s)
}

/// Generate arbitrary family IDs.
fn arb_family_id() -> impl Strategy<Value = String> {
    "[a-f0-9-]{8,36}".prop_map(|s| s)
}

/// Generate arbitrary generations.
fn arb_generation() -> impl Strategy<Value = u64> {
    1u64..10_000
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: Signed payloads verify back to the same payload.
    #[test]
    fn prop_sign_verify_preserves_payload(
        user_id in arb_user_id(),
        family_id in arb_family_id(),
        generation in arb_generation(),
    ) {
        let codec = codec(&[PRIMARY]);
        let payload = TokenPayload::new(user_id, family_id, generation);
        let token = codec.sign(&payload).unwrap();

        match codec.verify(&token) {
            VerifyOutcome::Valid { claims, key_position } => {
                prop_assert_eq!(key_position, 0);
                prop_assert!(claims.is_well_formed());
                prop_assert_eq!(claims.payload(), payload);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }

    /// Property 2: A token signed with a retired key verifies at that key's position.
    #[test]
    fn prop_retired_key_still_verifies(
        user_id in arb_user_id(),
        family_id in arb_family_id(),
        generation in arb_generation(),
    ) {
        let payload = TokenPayload::new(user_id, family_id, generation);
        let token = codec(&[OLD]).sign(&payload).unwrap();

        match codec(&[PRIMARY, OLD]).verify(&token) {
            VerifyOutcome::Valid { claims, key_position } => {
                prop_assert_eq!(key_position, 1);
                prop_assert_eq!(claims.payload(), payload);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }

    /// Property 3: Tokens signed with an unknown key are refused.
    #[test]
    fn prop_foreign_key_rejected(
        user_id in arb_user_id(),
        family_id in arb_family_id(),
        generation in arb_generation(),
    ) {
        let token = codec(&[FOREIGN])
            .sign(&TokenPayload::new(user_id, family_id, generation))
            .unwrap();

        prop_assert_eq!(codec(&[PRIMARY, OLD]).verify(&token), VerifyOutcome::InvalidSignature);
    }

    /// Property 3: Altering the signature segment invalidates the token.
    #[test]
    fn prop_tampered_signature_rejected(
        user_id in arb_user_id(),
        family_id in arb_family_id(),
    ) {
        let codec = codec(&[PRIMARY]);
        let token = codec.sign(&TokenPayload::new(user_id, family_id, 1)).unwrap();
        let (head, signature) = token.rsplit_once('.').unwrap();
        let flipped = if signature.starts_with('A') { "B" } else { "A" };
        let tampered = format!("{head}.{flipped}{}", &signature[1..]);

        let accepted = matches!(codec.verify(&tampered), VerifyOutcome::Valid { .. });
        prop_assert!(!accepted);
    }

    /// Property 4: Expired tokens report as expired for known and unknown keys.
    #[test]
    fn prop_expired_reported_for_any_key(
        user_id in arb_user_id(),
        family_id in arb_family_id(),
        age in 61i64..1_000_000,
    ) {
        let payload = TokenPayload::new(user_id, family_id, 1);
        let issued_at = chrono::Utc::now().timestamp() - age;
        let claims = RefreshClaims::issued_at(&payload, "intellifill", issued_at, 60);

        let known = codec(&[PRIMARY]).encode_claims(&claims).unwrap();
        let foreign = codec(&[FOREIGN]).encode_claims(&claims).unwrap();

        prop_assert_eq!(codec(&[PRIMARY]).verify(&known), VerifyOutcome::Expired);
        prop_assert_eq!(codec(&[PRIMARY]).verify(&foreign), VerifyOutcome::Expired);
    }
}

#[test]
fn test_garbage_is_malformed() {
    let codec = codec(&[PRIMARY]);
    for input in ["", "not-a-token", "a.b", "a.b.c"] {
        assert!(
            matches!(codec.verify(input), VerifyOutcome::Malformed(_)),
            "{input:?} should be malformed"
        );
    }
}
