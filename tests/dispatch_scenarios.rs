//! End-to-end dispatch scenarios
//!
//! Drives the public [`Dispatcher`] API the way an application would:
//! - Construction refuses a calibration table missing a registered primitive
//! - A small `secretbox` runs inline and matches the library's own output
//! - A 10 MB `secretbox` is offloaded and produces the same bytes as inline
//! - `secretbox_open` with the wrong key is a verification failure value
//! - Contract violations are rejected before execution, on every primitive

use aead::generic_array::GenericArray;
use aead::{AeadInPlace, KeyInit};
use crypto_secretbox::XSalsa20Poly1305;

use tokio_crypto_dispatch::registry::sizes::{KEY_BYTES, MAC_BYTES, NONCE_BYTES};
use tokio_crypto_dispatch::{
    CalibrationEntry, CalibrationTable, ConfigError, DispatchError, Dispatcher, DispatcherConfig,
    ExecutionPath, FailureKind, Output, Primitive,
};

const KEY: [u8; KEY_BYTES] = [0x42; KEY_BYTES];
const NONCE: [u8; NONCE_BYTES] = [0x24; NONCE_BYTES];

// ============================================================================
// Helpers
// ============================================================================

fn config() -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.offload.pool_size = Some(2);
    config
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(config(), CalibrationTable::reference()).expect("test: dispatcher")
}

fn secretbox_args(message: Vec<u8>) -> Vec<Vec<u8>> {
    vec![message, NONCE.to_vec(), KEY.to_vec()]
}

/// `tag ‖ ciphertext` computed directly with the cipher crate.
fn reference_secretbox(message: &[u8]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new_from_slice(&KEY).expect("test: key");
    let mut body = message.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(&NONCE), b"", &mut body)
        .expect("test: encrypt");
    let mut out = tag.to_vec();
    out.extend_from_slice(&body);
    out
}

/// `(public, secret)` from a `box_keypair` call.
async fn box_keypair(d: &Dispatcher) -> (Vec<u8>, Vec<u8>) {
    match d.invoke(Primitive::BoxKeypair, vec![]).await.expect("test: keypair") {
        Output::KeyPair { public, secret } => (public, secret.to_vec()),
        other => panic!("expected a key pair, got {other:?}"),
    }
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_missing_hash_calibration_is_refused_at_construction() {
    let table = CalibrationTable::reference().without(Primitive::Hash);
    let err = Dispatcher::new(config(), table).expect_err("test: incomplete table refused");

    assert_eq!(err.kind(), FailureKind::Configuration);
    match err {
        DispatchError::Config(ConfigError::MissingCalibration { primitive }) => {
            assert_eq!(primitive, "hash");
        }
        other => panic!("expected MissingCalibration, got {other:?}"),
    }
}

#[tokio::test]
async fn test_negative_coefficient_is_refused_at_construction() {
    let table = CalibrationTable::reference()
        .with_entry(Primitive::Auth, CalibrationEntry::new(-1.0, 0.0));
    let err = Dispatcher::new(config(), table).expect_err("test: negative cost refused");
    assert_eq!(err.kind(), FailureKind::Configuration);
}

#[tokio::test]
async fn test_reference_table_threshold_matches_defaults() {
    let d = dispatcher();
    // 100us budget, 1us per unit, margin 2.0
    assert!((d.threshold().cost_units().get() - 50.0).abs() < 1e-9);
    d.shutdown().await.expect("test: shutdown");
}

// ============================================================================
// secretbox across both paths
// ============================================================================

#[tokio::test]
async fn test_small_secretbox_runs_inline_and_matches_reference() {
    let d = dispatcher();
    let message = vec![0x61; 1_000];
    let args = secretbox_args(message.clone());

    let route = d.route(Primitive::Secretbox, &args).expect("test: route");
    assert_eq!(route.path, ExecutionPath::Inline);
    assert_eq!(route.input_len, 1_000);

    let out = d.invoke(Primitive::Secretbox, args).await.expect("test: invoke");
    let sealed = out.into_bytes().expect("test: bytes output");
    assert_eq!(sealed.len(), MAC_BYTES + 1_000);
    assert_eq!(sealed, reference_secretbox(&message));

    let stats = d.offload_stats();
    assert_eq!(stats.completed, 0, "inline call must not touch the pool");
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_large_secretbox_is_offloaded_with_identical_bytes() {
    let d = dispatcher();
    let message = vec![0x5a; 10 * 1024 * 1024];

    let route = d
        .route(Primitive::Secretbox, &secretbox_args(message.clone()))
        .expect("test: route");
    assert_eq!(route.path, ExecutionPath::Offload);

    let offloaded = d
        .invoke(Primitive::Secretbox, secretbox_args(message.clone()))
        .await
        .expect("test: offloaded invoke");
    assert_eq!(d.offload_stats().completed, 1);

    // Same call again under a table that prices everything inline.
    let everything_inline = CalibrationTable::from_entries(
        1.0,
        Primitive::ALL.map(|p| (p, CalibrationEntry::new(0.0, 0.0))),
    );
    d.load_calibration(everything_inline).expect("test: swap");
    let inline = d
        .invoke(Primitive::Secretbox, secretbox_args(message))
        .await
        .expect("test: inline invoke");
    assert_eq!(d.offload_stats().completed, 1, "second call must stay inline");

    assert_eq!(offloaded, inline);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_secretbox_open_with_wrong_key_is_verification_failure() {
    let d = dispatcher();
    let sealed = d
        .invoke(Primitive::Secretbox, secretbox_args(b"attack at dawn".to_vec()))
        .await
        .expect("test: seal")
        .into_bytes()
        .expect("test: bytes output");

    let opened = d
        .invoke(
            Primitive::SecretboxOpen,
            vec![sealed.clone(), NONCE.to_vec(), vec![0x00; KEY_BYTES]],
        )
        .await
        .expect("test: a failed check is a value, not an error");
    assert_eq!(opened, Output::VerificationFailed);

    let opened = d
        .invoke(Primitive::SecretboxOpen, vec![sealed, NONCE.to_vec(), KEY.to_vec()])
        .await
        .expect("test: open");
    assert_eq!(opened, Output::Bytes(b"attack at dawn".to_vec()));
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_tampered_ciphertext_fails_verification() {
    let d = dispatcher();
    let mut sealed = d
        .invoke(Primitive::Secretbox, secretbox_args(b"ledger".to_vec()))
        .await
        .expect("test: seal")
        .into_bytes()
        .expect("test: bytes output");
    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;

    let opened = d
        .invoke(Primitive::SecretboxOpen, vec![sealed, NONCE.to_vec(), KEY.to_vec()])
        .await
        .expect("test: open");
    assert_eq!(opened, Output::VerificationFailed);
    d.shutdown().await.expect("test: shutdown");
}

// ============================================================================
// Public-key primitives by name
// ============================================================================

#[tokio::test]
async fn test_sign_round_trip_by_identifier() {
    let d = dispatcher();
    let Output::KeyPair { public, secret } = d
        .invoke_named("sign_keypair", vec![])
        .await
        .expect("test: keypair")
    else {
        panic!("expected a key pair");
    };

    let signed = d
        .invoke_named("sign", vec![b"release v1".to_vec(), secret.to_vec()])
        .await
        .expect("test: sign")
        .into_bytes()
        .expect("test: bytes output");
    assert_eq!(signed.len(), 64 + b"release v1".len());

    let opened = d
        .invoke_named("sign_open", vec![signed.clone(), public.clone()])
        .await
        .expect("test: sign_open");
    assert_eq!(opened, Output::Bytes(b"release v1".to_vec()));

    let mut forged = signed;
    forged[70] ^= 0xff;
    let opened = d
        .invoke_named("sign_open", vec![forged, public])
        .await
        .expect("test: sign_open");
    assert_eq!(opened, Output::VerificationFailed);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_box_between_two_parties() {
    let d = dispatcher();
    let (alice_pk, alice_sk) = box_keypair(&d).await;
    let (bob_pk, bob_sk) = box_keypair(&d).await;

    let sealed = d
        .invoke(
            Primitive::Box,
            vec![b"hi bob".to_vec(), NONCE.to_vec(), bob_pk, alice_sk],
        )
        .await
        .expect("test: box")
        .into_bytes()
        .expect("test: bytes output");
    let opened = d
        .invoke(Primitive::BoxOpen, vec![sealed, NONCE.to_vec(), alice_pk, bob_sk])
        .await
        .expect("test: box_open");
    assert_eq!(opened, Output::Bytes(b"hi bob".to_vec()));
    d.shutdown().await.expect("test: shutdown");
}

// ============================================================================
// Contract violations
// ============================================================================

#[tokio::test]
async fn test_wrong_arity_is_rejected_for_every_primitive() {
    let d = dispatcher();
    for p in Primitive::ALL {
        let too_many = vec![vec![0u8; 8]; p.spec().arity() + 1];
        let err = d
            .invoke(p, too_many)
            .await
            .expect_err("test: wrong arity rejected");
        assert_eq!(err.kind(), FailureKind::ContractViolation, "primitive {p}");
    }
    assert_eq!(d.offload_stats().completed, 0);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_short_nonce_is_rejected_before_execution() {
    let d = dispatcher();
    let err = d
        .invoke(
            Primitive::Secretbox,
            vec![vec![0u8; 64 * 1024 * 1024], vec![0u8; 23], KEY.to_vec()],
        )
        .await
        .expect_err("test: bad nonce rejected");
    match err {
        DispatchError::ContractViolation { primitive, reason } => {
            assert_eq!(primitive, "secretbox");
            assert!(reason.contains("nonce"), "reason was: {reason}");
        }
        other => panic!("expected ContractViolation, got {other:?}"),
    }
    assert_eq!(d.offload_stats().completed, 0, "no execution attempt");
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_unknown_identifier_is_contract_violation() {
    let d = dispatcher();
    let err = d
        .invoke_named("crypto_scalarmult", vec![])
        .await
        .expect_err("test: unknown id rejected");
    assert_eq!(err.kind(), FailureKind::ContractViolation);
    d.shutdown().await.expect("test: shutdown");
}

#[tokio::test]
async fn test_empty_hash_input_is_valid() {
    let d = dispatcher();
    let out = d
        .invoke(Primitive::Hash, vec![vec![]])
        .await
        .expect("test: hash of empty input");
    assert_eq!(out.as_bytes().map(<[u8]>::len), Some(64));
    d.shutdown().await.expect("test: shutdown");
}
