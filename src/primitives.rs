//! External primitive adapter.
//!
//! Provides the [`PrimitiveBackend`] trait and the production implementation:
//! - [`RustCryptoBackend`]: the NaCl primitive set over the RustCrypto and
//!   dalek crates
//!
//! Backends are pure functions over byte buffers. They never see the cost
//! model, the budget, or the thread they run on; the dispatcher guarantees
//! that argument lengths were already validated against the registry.
//!
//! ## Wire formats
//!
//! - `box` / `secretbox`: `tag(16) ‖ ciphertext`; `*_open` takes the same.
//! - `sign`: `signature(64) ‖ message`; `sign_open` returns the message.
//! - `sign` secret keys are the 64-byte `seed ‖ public key` form.
//! - `auth`: HMAC-SHA-512 truncated to 32 bytes.

use std::panic::{self, AssertUnwindSafe};

use aead::generic_array::GenericArray;
use aead::{AeadInPlace, KeyInit};
use crypto_box::SalsaBox;
use crypto_secretbox::XSalsa20Poly1305;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use poly1305::Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::XSalsa20;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::registry::sizes::*;
use crate::registry::{decode_length, Primitive};
use crate::DispatchError;

/// Result value of a primitive call.
///
/// [`Output::VerificationFailed`] is an ordinary outcome, not an error: it
/// carries no detail about why a check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// A single output buffer (ciphertext, plaintext, tag, digest, keystream).
    Bytes(Vec<u8>),
    /// Freshly generated key material.
    KeyPair {
        /// Public half.
        public: Vec<u8>,
        /// Secret half, wiped on drop.
        secret: Zeroizing<Vec<u8>>,
    },
    /// Boolean result of a MAC check or constant-time comparison.
    Verdict(bool),
    /// Authenticated decryption or signature check rejected the input.
    VerificationFailed,
}

impl Output {
    /// The output buffer, if this is [`Output::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Output::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Consume into the output buffer, if this is [`Output::Bytes`].
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Output::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Trait for the external library that actually runs primitives.
///
/// Implementations must be thread-safe (Send + Sync): the same backend is
/// called inline from runtime threads and from offload workers. Calls are
/// run-to-completion; there is no cancellation point inside `call`.
pub trait PrimitiveBackend: Send + Sync + 'static {
    /// Run `primitive` over `inputs`.
    ///
    /// `inputs` has already passed [`crate::PrimitiveSpec::validate`].
    fn call(&self, primitive: Primitive, inputs: &[Vec<u8>]) -> Result<Output, DispatchError>;
}

/// Run a backend call, turning a panic into [`DispatchError::WorkerFault`].
pub(crate) fn call_guarded(
    backend: &dyn PrimitiveBackend,
    primitive: Primitive,
    inputs: &[Vec<u8>],
) -> Result<Output, DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(|| backend.call(primitive, inputs)))
        .unwrap_or_else(|payload| Err(DispatchError::WorkerFault(panic_message(payload.as_ref()))))
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("primitive panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("primitive panicked: {s}")
    } else {
        "primitive panicked".to_string()
    }
}

// ============================================================================
// RustCrypto backend
// ============================================================================

/// Production backend over RustCrypto (`crypto_secretbox`, `crypto_box`,
/// `salsa20`, `poly1305`, `hmac`, `sha2`) and `ed25519-dalek`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoBackend;

impl RustCryptoBackend {
    /// Create the backend. It holds no state.
    pub fn new() -> Self {
        Self
    }
}

impl PrimitiveBackend for RustCryptoBackend {
    fn call(&self, primitive: Primitive, inputs: &[Vec<u8>]) -> Result<Output, DispatchError> {
        let arg = |i: usize| {
            inputs
                .get(i)
                .map(Vec::as_slice)
                .ok_or_else(|| DispatchError::contract(primitive.as_str(), "missing argument"))
        };

        match primitive {
            Primitive::BoxKeypair => box_keypair(),
            Primitive::Box => box_seal(arg(0)?, arg(1)?, arg(2)?, arg(3)?),
            Primitive::BoxOpen => box_open(arg(0)?, arg(1)?, arg(2)?, arg(3)?),
            Primitive::SignKeypair => sign_keypair(),
            Primitive::Sign => sign(arg(0)?, arg(1)?),
            Primitive::SignOpen => sign_open(arg(0)?, arg(1)?),
            Primitive::Secretbox => secretbox_seal(arg(0)?, arg(1)?, arg(2)?),
            Primitive::SecretboxOpen => secretbox_open(arg(0)?, arg(1)?, arg(2)?),
            Primitive::Stream => {
                let len = decode_length(arg(0)?).ok_or_else(|| {
                    DispatchError::contract(primitive.as_str(), "bad length argument")
                })?;
                let len = usize::try_from(len).map_err(|_| {
                    DispatchError::ResourceExhausted(format!(
                        "stream length {len} exceeds addressable memory"
                    ))
                })?;
                stream_xor(primitive, zeroed(len)?, arg(1)?, arg(2)?)
            }
            Primitive::StreamXor => stream_xor(primitive, copied(arg(0)?, 0)?, arg(1)?, arg(2)?),
            Primitive::Auth => auth(arg(0)?, arg(1)?).map(Output::Bytes),
            Primitive::AuthVerify => {
                let expected = auth(arg(1)?, arg(2)?)?;
                Ok(Output::Verdict(ct_eq(&expected, arg(0)?)))
            }
            Primitive::Onetimeauth => onetimeauth(arg(0)?, arg(1)?).map(Output::Bytes),
            Primitive::OnetimeauthVerify => {
                let expected = onetimeauth(arg(1)?, arg(2)?)?;
                Ok(Output::Verdict(ct_eq(&expected, arg(0)?)))
            }
            Primitive::Hash => {
                let mut out = reserve(HASH_BYTES)?;
                out.extend_from_slice(&Sha512::digest(arg(0)?));
                Ok(Output::Bytes(out))
            }
            Primitive::Verify16 | Primitive::Verify32 => Ok(Output::Verdict(ct_eq(arg(0)?, arg(1)?))),
        }
    }
}

// ── Buffer helpers ───────────────────────────────────────────────────────

/// Reserve an empty output buffer, reporting allocation failure as a value.
fn reserve(capacity: usize) -> Result<Vec<u8>, DispatchError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity).map_err(|e| {
        DispatchError::ResourceExhausted(format!("cannot allocate {capacity}-byte output: {e}"))
    })?;
    Ok(buf)
}

/// A zero-filled buffer of `len` bytes.
fn zeroed(len: usize) -> Result<Vec<u8>, DispatchError> {
    let mut buf = reserve(len)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// `prefix` zero bytes followed by a copy of `data`.
fn copied(data: &[u8], prefix: usize) -> Result<Vec<u8>, DispatchError> {
    let total = prefix.checked_add(data.len()).ok_or_else(|| {
        DispatchError::ResourceExhausted("output length overflows usize".to_string())
    })?;
    let mut buf = reserve(total)?;
    buf.resize(prefix, 0);
    buf.extend_from_slice(data);
    Ok(buf)
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

fn key_array<const N: usize>(primitive: &str, bytes: &[u8]) -> Result<[u8; N], DispatchError> {
    bytes
        .try_into()
        .map_err(|_| DispatchError::contract(primitive, format!("key must be {N} bytes")))
}

fn fresh_seed() -> Result<Zeroizing<[u8; 32]>, DispatchError> {
    let mut seed = Zeroizing::new([0u8; 32]);
    OsRng.try_fill_bytes(seed.as_mut()).map_err(|e| {
        DispatchError::ResourceExhausted(format!("entropy source unavailable: {e}"))
    })?;
    Ok(seed)
}

// ── Authenticated encryption ─────────────────────────────────────────────

/// Encrypt in place behind a `MAC_BYTES` prefix, then write the tag there.
fn seal_with<A: AeadInPlace>(
    cipher: &A,
    primitive: Primitive,
    message: &[u8],
    nonce: &[u8],
) -> Result<Output, DispatchError> {
    let mut out = copied(message, MAC_BYTES)?;
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", &mut out[MAC_BYTES..])
        .map_err(|_| DispatchError::contract(primitive.as_str(), "message too long for cipher"))?;
    out[..MAC_BYTES].copy_from_slice(&tag);
    Ok(Output::Bytes(out))
}

fn open_with<A: AeadInPlace>(
    cipher: &A,
    primitive: Primitive,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Output, DispatchError> {
    if ciphertext.len() < MAC_BYTES {
        return Err(DispatchError::contract(primitive.as_str(), "ciphertext shorter than tag"));
    }
    let (tag, body) = ciphertext.split_at(MAC_BYTES);
    let mut out = copied(body, 0)?;
    match cipher.decrypt_in_place_detached(
        GenericArray::from_slice(nonce),
        b"",
        &mut out,
        GenericArray::from_slice(tag),
    ) {
        Ok(()) => Ok(Output::Bytes(out)),
        Err(_) => {
            out.zeroize();
            Ok(Output::VerificationFailed)
        }
    }
}

fn secretbox_seal(message: &[u8], nonce: &[u8], key: &[u8]) -> Result<Output, DispatchError> {
    let cipher = XSalsa20Poly1305::new_from_slice(key)
        .map_err(|_| DispatchError::contract("secretbox", "key must be 32 bytes"))?;
    seal_with(&cipher, Primitive::Secretbox, message, nonce)
}

fn secretbox_open(ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<Output, DispatchError> {
    let cipher = XSalsa20Poly1305::new_from_slice(key)
        .map_err(|_| DispatchError::contract("secretbox_open", "key must be 32 bytes"))?;
    open_with(&cipher, Primitive::SecretboxOpen, ciphertext, nonce)
}

fn salsa_box(primitive: Primitive, pk: &[u8], sk: &[u8]) -> Result<SalsaBox, DispatchError> {
    let public = crypto_box::PublicKey::from(key_array::<BOX_PUBLIC_KEY_BYTES>(
        primitive.as_str(),
        pk,
    )?);
    let secret = crypto_box::SecretKey::from(key_array::<BOX_SECRET_KEY_BYTES>(
        primitive.as_str(),
        sk,
    )?);
    Ok(SalsaBox::new(&public, &secret))
}

fn box_seal(message: &[u8], nonce: &[u8], pk: &[u8], sk: &[u8]) -> Result<Output, DispatchError> {
    let cipher = salsa_box(Primitive::Box, pk, sk)?;
    seal_with(&cipher, Primitive::Box, message, nonce)
}

fn box_open(ciphertext: &[u8], nonce: &[u8], pk: &[u8], sk: &[u8]) -> Result<Output, DispatchError> {
    let cipher = salsa_box(Primitive::BoxOpen, pk, sk)?;
    open_with(&cipher, Primitive::BoxOpen, ciphertext, nonce)
}

fn box_keypair() -> Result<Output, DispatchError> {
    let seed = fresh_seed()?;
    let secret = crypto_box::SecretKey::from(*seed);
    let public = secret.public_key();
    Ok(Output::KeyPair {
        public: public.as_bytes().to_vec(),
        secret: Zeroizing::new(secret.to_bytes().to_vec()),
    })
}

// ── Signatures ───────────────────────────────────────────────────────────

fn sign_keypair() -> Result<Output, DispatchError> {
    let seed = fresh_seed()?;
    let key = SigningKey::from_bytes(&seed);
    Ok(Output::KeyPair {
        public: key.verifying_key().to_bytes().to_vec(),
        secret: Zeroizing::new(key.to_keypair_bytes().to_vec()),
    })
}

fn sign(message: &[u8], sk: &[u8]) -> Result<Output, DispatchError> {
    let keypair = Zeroizing::new(key_array::<SIGN_SECRET_KEY_BYTES>("sign", sk)?);
    let key = SigningKey::from_keypair_bytes(&keypair)
        .map_err(|_| DispatchError::contract("sign", "secret key halves do not match"))?;
    let signature = key.sign(message);

    let mut out = reserve(SIGNATURE_BYTES + message.len())?;
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(message);
    Ok(Output::Bytes(out))
}

fn sign_open(signed: &[u8], pk: &[u8]) -> Result<Output, DispatchError> {
    if signed.len() < SIGNATURE_BYTES {
        return Ok(Output::VerificationFailed);
    }
    let Ok(key) = VerifyingKey::from_bytes(&key_array::<SIGN_PUBLIC_KEY_BYTES>("sign_open", pk)?)
    else {
        return Ok(Output::VerificationFailed);
    };
    let (sig, message) = signed.split_at(SIGNATURE_BYTES);
    let Ok(signature) = Signature::from_slice(sig) else {
        return Ok(Output::VerificationFailed);
    };

    match key.verify(message, &signature) {
        Ok(()) => Ok(Output::Bytes(copied(message, 0)?)),
        Err(_) => Ok(Output::VerificationFailed),
    }
}

// ── Stream cipher ────────────────────────────────────────────────────────

fn stream_xor(
    primitive: Primitive,
    mut buf: Vec<u8>,
    nonce: &[u8],
    key: &[u8],
) -> Result<Output, DispatchError> {
    let mut cipher = XSalsa20::new_from_slices(key, nonce)
        .map_err(|_| DispatchError::contract(primitive.as_str(), "bad key or nonce length"))?;
    cipher.apply_keystream(&mut buf);
    Ok(Output::Bytes(buf))
}

// ── MACs ─────────────────────────────────────────────────────────────────

fn auth(message: &[u8], key: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
        .map_err(|_| DispatchError::contract("auth", "key must be 32 bytes"))?;
    mac.update(message);
    let full = mac.finalize().into_bytes();

    let mut out = reserve(AUTH_BYTES)?;
    out.extend_from_slice(&full[..AUTH_BYTES]);
    Ok(out)
}

fn onetimeauth(message: &[u8], key: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let mac = Poly1305::new_from_slice(key)
        .map_err(|_| DispatchError::contract("onetimeauth", "key must be 32 bytes"))?;
    let tag = mac.compute_unpadded(message);

    let mut out = reserve(ONETIMEAUTH_BYTES)?;
    out.extend_from_slice(&tag);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::encode_length;

    const KEY: [u8; 32] = [0x42; 32];
    const NONCE: [u8; 24] = [0x24; 24];

    fn call(p: Primitive, inputs: Vec<Vec<u8>>) -> Output {
        p.spec().validate(&inputs).expect("test: valid inputs");
        RustCryptoBackend::new().call(p, &inputs).expect("test: call succeeds")
    }

    fn bytes(out: Output) -> Vec<u8> {
        out.into_bytes().expect("test: bytes output")
    }

    #[test]
    fn test_secretbox_round_trip() {
        let sealed = bytes(call(
            Primitive::Secretbox,
            vec![b"attack at dawn".to_vec(), NONCE.to_vec(), KEY.to_vec()],
        ));
        assert_eq!(sealed.len(), MAC_BYTES + 14);

        let opened = call(Primitive::SecretboxOpen, vec![sealed, NONCE.to_vec(), KEY.to_vec()]);
        assert_eq!(opened, Output::Bytes(b"attack at dawn".to_vec()));
    }

    #[test]
    fn test_secretbox_matches_library_detached_output() {
        let message = b"reference fixture".to_vec();
        let sealed = bytes(call(
            Primitive::Secretbox,
            vec![message.clone(), NONCE.to_vec(), KEY.to_vec()],
        ));

        let cipher = XSalsa20Poly1305::new_from_slice(&KEY).expect("test: key");
        let mut body = message;
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&NONCE), b"", &mut body)
            .expect("test: encrypt");
        assert_eq!(&sealed[..MAC_BYTES], tag.as_slice());
        assert_eq!(&sealed[MAC_BYTES..], body.as_slice());
    }

    #[test]
    fn test_secretbox_open_wrong_key_is_verification_failure() {
        let sealed = bytes(call(
            Primitive::Secretbox,
            vec![b"secret".to_vec(), NONCE.to_vec(), KEY.to_vec()],
        ));
        let opened = call(Primitive::SecretboxOpen, vec![sealed, NONCE.to_vec(), vec![0x43; 32]]);
        assert_eq!(opened, Output::VerificationFailed);
    }

    #[test]
    fn test_secretbox_empty_message_is_tag_only() {
        let sealed = bytes(call(Primitive::Secretbox, vec![vec![], NONCE.to_vec(), KEY.to_vec()]));
        assert_eq!(sealed.len(), MAC_BYTES);
        let opened = call(Primitive::SecretboxOpen, vec![sealed, NONCE.to_vec(), KEY.to_vec()]);
        assert_eq!(opened, Output::Bytes(vec![]));
    }

    #[test]
    fn test_box_round_trip_between_two_parties() {
        let Output::KeyPair { public: alice_pk, secret: alice_sk } = call(Primitive::BoxKeypair, vec![])
        else {
            panic!("expected key pair");
        };
        let Output::KeyPair { public: bob_pk, secret: bob_sk } = call(Primitive::BoxKeypair, vec![])
        else {
            panic!("expected key pair");
        };

        let sealed = bytes(call(
            Primitive::Box,
            vec![b"hi bob".to_vec(), NONCE.to_vec(), bob_pk, alice_sk.to_vec()],
        ));
        let opened = call(
            Primitive::BoxOpen,
            vec![sealed, NONCE.to_vec(), alice_pk, bob_sk.to_vec()],
        );
        assert_eq!(opened, Output::Bytes(b"hi bob".to_vec()));
    }

    #[test]
    fn test_sign_round_trip_and_tamper_detection() {
        let Output::KeyPair { public, secret } = call(Primitive::SignKeypair, vec![]) else {
            panic!("expected key pair");
        };
        assert_eq!(public.len(), SIGN_PUBLIC_KEY_BYTES);
        assert_eq!(secret.len(), SIGN_SECRET_KEY_BYTES);

        let signed = bytes(call(Primitive::Sign, vec![b"ledger".to_vec(), secret.to_vec()]));
        assert_eq!(signed.len(), SIGNATURE_BYTES + 6);
        assert_eq!(
            call(Primitive::SignOpen, vec![signed.clone(), public.clone()]),
            Output::Bytes(b"ledger".to_vec())
        );

        let mut tampered = signed;
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        assert_eq!(
            call(Primitive::SignOpen, vec![tampered, public]),
            Output::VerificationFailed
        );
    }

    #[test]
    fn test_sign_open_short_input_is_verification_failure() {
        let out = call(Primitive::SignOpen, vec![vec![0; 10], vec![0; 32]]);
        assert_eq!(out, Output::VerificationFailed);
    }

    #[test]
    fn test_stream_xor_with_zero_message_equals_stream() {
        let keystream = bytes(call(
            Primitive::Stream,
            vec![encode_length(100), NONCE.to_vec(), KEY.to_vec()],
        ));
        let xored = bytes(call(Primitive::StreamXor, vec![vec![0; 100], NONCE.to_vec(), KEY.to_vec()]));
        assert_eq!(keystream.len(), 100);
        assert_eq!(keystream, xored);
    }

    #[test]
    fn test_stream_unrepresentable_length_is_resource_exhaustion() {
        let inputs = vec![encode_length(u64::MAX), NONCE.to_vec(), KEY.to_vec()];
        let err = RustCryptoBackend::new().call(Primitive::Stream, &inputs).unwrap_err();
        assert!(matches!(err, DispatchError::ResourceExhausted(_)), "got: {err}");
    }

    #[test]
    fn test_auth_verify_accepts_own_tag_and_rejects_other() {
        let tag = bytes(call(Primitive::Auth, vec![b"msg".to_vec(), KEY.to_vec()]));
        assert_eq!(tag.len(), AUTH_BYTES);
        assert_eq!(
            call(Primitive::AuthVerify, vec![tag.clone(), b"msg".to_vec(), KEY.to_vec()]),
            Output::Verdict(true)
        );
        assert_eq!(
            call(Primitive::AuthVerify, vec![tag, b"msh".to_vec(), KEY.to_vec()]),
            Output::Verdict(false)
        );
    }

    #[test]
    fn test_onetimeauth_verify_round_trip() {
        let tag = bytes(call(Primitive::Onetimeauth, vec![b"once".to_vec(), KEY.to_vec()]));
        assert_eq!(tag.len(), ONETIMEAUTH_BYTES);
        assert_eq!(
            call(Primitive::OnetimeauthVerify, vec![tag, b"once".to_vec(), KEY.to_vec()]),
            Output::Verdict(true)
        );
    }

    #[test]
    fn test_hash_is_sha512() {
        let digest = bytes(call(Primitive::Hash, vec![b"abc".to_vec()]));
        assert_eq!(digest, Sha512::digest(b"abc").to_vec());
        assert_eq!(digest.len(), HASH_BYTES);
    }

    #[test]
    fn test_verify_16_and_32() {
        assert_eq!(call(Primitive::Verify16, vec![vec![1; 16], vec![1; 16]]), Output::Verdict(true));
        assert_eq!(call(Primitive::Verify16, vec![vec![1; 16], vec![2; 16]]), Output::Verdict(false));
        assert_eq!(call(Primitive::Verify32, vec![vec![9; 32], vec![9; 32]]), Output::Verdict(true));
    }

    #[test]
    fn test_call_guarded_turns_panic_into_worker_fault() {
        struct Exploding;
        impl PrimitiveBackend for Exploding {
            fn call(&self, _: Primitive, _: &[Vec<u8>]) -> Result<Output, DispatchError> {
                panic!("boom");
            }
        }
        let err = call_guarded(&Exploding, Primitive::Hash, &[vec![]]).unwrap_err();
        assert!(matches!(err, DispatchError::WorkerFault(ref m) if m.contains("boom")));
    }
}
