//! # Primitive Registry
//!
//! ## Responsibility
//! Name every supported primitive and pin down its call shape: arity, the
//! byte-length constraint on each argument, and which argument drives its
//! cost.
//!
//! ## Guarantees
//! - Closed: the set of primitives is a Rust enum, so the registry and any
//!   exhaustive `match` over it cannot drift apart
//! - Static: every [`PrimitiveSpec`] is a `'static` constant, built at
//!   compile time and never destroyed
//! - Pre-flight: [`PrimitiveSpec::validate`] rejects bad calls before any
//!   cost estimate or execution happens
//!
//! ## NOT Responsible For
//! - Cost coefficients (that belongs to `calibration`)
//! - Running the primitive (that belongs to `primitives`)

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::DispatchError;

/// Fixed parameter sizes of the external primitives, in bytes.
pub mod sizes {
    /// Authenticator prepended to `box` / `secretbox` ciphertexts.
    pub const MAC_BYTES: usize = 16;
    /// XSalsa20 nonce, shared by `box`, `secretbox`, and `stream`.
    pub const NONCE_BYTES: usize = 24;
    /// Symmetric key for `secretbox`, `stream`, `auth`, `onetimeauth`.
    pub const KEY_BYTES: usize = 32;
    /// Curve25519 public key for `box`.
    pub const BOX_PUBLIC_KEY_BYTES: usize = 32;
    /// Curve25519 secret key for `box`.
    pub const BOX_SECRET_KEY_BYTES: usize = 32;
    /// Ed25519 public key for `sign_open`.
    pub const SIGN_PUBLIC_KEY_BYTES: usize = 32;
    /// Ed25519 keypair bytes (seed ‖ public key) for `sign`.
    pub const SIGN_SECRET_KEY_BYTES: usize = 64;
    /// Ed25519 signature prepended to signed messages.
    pub const SIGNATURE_BYTES: usize = 64;
    /// `auth` tag (HMAC-SHA-512 truncated to 256 bits).
    pub const AUTH_BYTES: usize = 32;
    /// `onetimeauth` tag (Poly1305).
    pub const ONETIMEAUTH_BYTES: usize = 16;
    /// `hash` digest (SHA-512).
    pub const HASH_BYTES: usize = 64;
    /// Encoded `stream` length argument (big-endian u64).
    pub const LENGTH_BYTES: usize = 8;
}

use sizes::*;

/// Identifier of a registered primitive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    /// Curve25519 key pair generation.
    BoxKeypair,
    /// Public-key authenticated encryption.
    Box,
    /// Public-key authenticated decryption.
    BoxOpen,
    /// Ed25519 key pair generation.
    SignKeypair,
    /// Ed25519 signing; output is signature ‖ message.
    Sign,
    /// Ed25519 signature check; output is the message.
    SignOpen,
    /// Secret-key authenticated encryption.
    Secretbox,
    /// Secret-key authenticated decryption.
    SecretboxOpen,
    /// Raw XSalsa20 keystream of a declared length.
    Stream,
    /// XSalsa20 keystream XOR a message.
    StreamXor,
    /// Multi-use MAC.
    Auth,
    /// Multi-use MAC check.
    AuthVerify,
    /// One-time MAC.
    Onetimeauth,
    /// One-time MAC check.
    OnetimeauthVerify,
    /// SHA-512.
    Hash,
    /// Constant-time equality of two 16-byte strings.
    #[serde(rename = "verify_16")]
    Verify16,
    /// Constant-time equality of two 32-byte strings.
    #[serde(rename = "verify_32")]
    Verify32,
}

impl Primitive {
    /// Every registered primitive, in registry order.
    pub const ALL: [Primitive; 17] = [
        Primitive::BoxKeypair,
        Primitive::Box,
        Primitive::BoxOpen,
        Primitive::SignKeypair,
        Primitive::Sign,
        Primitive::SignOpen,
        Primitive::Secretbox,
        Primitive::SecretboxOpen,
        Primitive::Stream,
        Primitive::StreamXor,
        Primitive::Auth,
        Primitive::AuthVerify,
        Primitive::Onetimeauth,
        Primitive::OnetimeauthVerify,
        Primitive::Hash,
        Primitive::Verify16,
        Primitive::Verify32,
    ];

    /// Stable snake_case identifier, identical to the serde form.
    pub fn as_str(self) -> &'static str {
        self.spec().id
    }

    /// The static call-shape description of this primitive.
    pub fn spec(self) -> &'static PrimitiveSpec {
        match self {
            Primitive::BoxKeypair => &BOX_KEYPAIR,
            Primitive::Box => &BOX,
            Primitive::BoxOpen => &BOX_OPEN,
            Primitive::SignKeypair => &SIGN_KEYPAIR,
            Primitive::Sign => &SIGN,
            Primitive::SignOpen => &SIGN_OPEN,
            Primitive::Secretbox => &SECRETBOX,
            Primitive::SecretboxOpen => &SECRETBOX_OPEN,
            Primitive::Stream => &STREAM,
            Primitive::StreamXor => &STREAM_XOR,
            Primitive::Auth => &AUTH,
            Primitive::AuthVerify => &AUTH_VERIFY,
            Primitive::Onetimeauth => &ONETIMEAUTH,
            Primitive::OnetimeauthVerify => &ONETIMEAUTH_VERIFY,
            Primitive::Hash => &HASH,
            Primitive::Verify16 => &VERIFY_16,
            Primitive::Verify32 => &VERIFY_32,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Primitive {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Primitive::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DispatchError::contract(s, "unknown primitive id"))
    }
}

/// Byte-length constraint on one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Any length, including empty.
    Any,
    /// Exactly this many bytes.
    Exact(usize),
    /// At least this many bytes.
    AtLeast(usize),
}

impl Constraint {
    fn admits(self, len: usize) -> bool {
        match self {
            Constraint::Any => true,
            Constraint::Exact(n) => len == n,
            Constraint::AtLeast(n) => len >= n,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => f.write_str("any length"),
            Constraint::Exact(n) => write!(f, "exactly {n} bytes"),
            Constraint::AtLeast(n) => write!(f, "at least {n} bytes"),
        }
    }
}

/// One positional argument of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    /// Argument name, used in contract-violation messages.
    pub name: &'static str,
    /// Length constraint checked before dispatch.
    pub constraint: Constraint,
}

const fn arg(name: &'static str, constraint: Constraint) -> Arg {
    Arg { name, constraint }
}

/// Which part of a call determines its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBasis {
    /// Cost does not depend on the inputs (key generation, fixed compares).
    Constant,
    /// Cost scales with the byte length of the argument at this index.
    InputLen(usize),
    /// Cost scales with the big-endian u64 encoded in the argument at this
    /// index (the length of output the primitive will produce).
    DeclaredLen(usize),
}

/// Static description of one primitive's call shape.
#[derive(Debug, PartialEq, Eq)]
pub struct PrimitiveSpec {
    /// The primitive this spec describes.
    pub primitive: Primitive,
    /// Stable identifier.
    pub id: &'static str,
    /// Positional arguments; the arity is `args.len()`.
    pub args: &'static [Arg],
    /// Which argument drives the cost model.
    pub cost_basis: CostBasis,
}

impl PrimitiveSpec {
    /// Number of byte buffers the primitive takes.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Check arity and every argument's length constraint.
    ///
    /// # Returns
    ///
    /// - `Ok(len)`: the cost-driving input length for the estimator
    /// - `Err(DispatchError::ContractViolation)` naming the first bad argument
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn validate(&self, inputs: &[Vec<u8>]) -> Result<u64, DispatchError> {
        if inputs.len() != self.arity() {
            return Err(DispatchError::contract(
                self.id,
                format!("expected {} arguments, got {}", self.arity(), inputs.len()),
            ));
        }

        for (input, spec) in inputs.iter().zip(self.args) {
            if !spec.constraint.admits(input.len()) {
                return Err(DispatchError::contract(
                    self.id,
                    format!(
                        "argument `{}` must be {}, got {} bytes",
                        spec.name,
                        spec.constraint,
                        input.len()
                    ),
                ));
            }
        }

        Ok(match self.cost_basis {
            CostBasis::Constant => 0,
            CostBasis::InputLen(i) => inputs[i].len() as u64,
            CostBasis::DeclaredLen(i) => decode_length(&inputs[i]).ok_or_else(|| {
                DispatchError::contract(self.id, "length argument must be a big-endian u64")
            })?,
        })
    }
}

/// Decode an 8-byte big-endian length argument.
pub fn decode_length(buf: &[u8]) -> Option<u64> {
    let bytes: [u8; LENGTH_BYTES] = buf.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Encode a length argument for `stream`.
pub fn encode_length(len: u64) -> Vec<u8> {
    len.to_be_bytes().to_vec()
}

// ── Registry table ───────────────────────────────────────────────────────

static BOX_KEYPAIR: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::BoxKeypair,
    id: "box_keypair",
    args: &[],
    cost_basis: CostBasis::Constant,
};

static BOX: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Box,
    id: "box",
    args: &[
        arg("message", Constraint::Any),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("public_key", Constraint::Exact(BOX_PUBLIC_KEY_BYTES)),
        arg("secret_key", Constraint::Exact(BOX_SECRET_KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static BOX_OPEN: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::BoxOpen,
    id: "box_open",
    args: &[
        arg("ciphertext", Constraint::AtLeast(MAC_BYTES)),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("public_key", Constraint::Exact(BOX_PUBLIC_KEY_BYTES)),
        arg("secret_key", Constraint::Exact(BOX_SECRET_KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static SIGN_KEYPAIR: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::SignKeypair,
    id: "sign_keypair",
    args: &[],
    cost_basis: CostBasis::Constant,
};

static SIGN: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Sign,
    id: "sign",
    args: &[
        arg("message", Constraint::Any),
        arg("secret_key", Constraint::Exact(SIGN_SECRET_KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static SIGN_OPEN: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::SignOpen,
    id: "sign_open",
    args: &[
        arg("signed_message", Constraint::Any),
        arg("public_key", Constraint::Exact(SIGN_PUBLIC_KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static SECRETBOX: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Secretbox,
    id: "secretbox",
    args: &[
        arg("message", Constraint::Any),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static SECRETBOX_OPEN: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::SecretboxOpen,
    id: "secretbox_open",
    args: &[
        arg("ciphertext", Constraint::AtLeast(MAC_BYTES)),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static STREAM: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Stream,
    id: "stream",
    args: &[
        arg("length", Constraint::Exact(LENGTH_BYTES)),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::DeclaredLen(0),
};

static STREAM_XOR: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::StreamXor,
    id: "stream_xor",
    args: &[
        arg("message", Constraint::Any),
        arg("nonce", Constraint::Exact(NONCE_BYTES)),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static AUTH: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Auth,
    id: "auth",
    args: &[
        arg("message", Constraint::Any),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static AUTH_VERIFY: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::AuthVerify,
    id: "auth_verify",
    args: &[
        arg("tag", Constraint::Exact(AUTH_BYTES)),
        arg("message", Constraint::Any),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(1),
};

static ONETIMEAUTH: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Onetimeauth,
    id: "onetimeauth",
    args: &[
        arg("message", Constraint::Any),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(0),
};

static ONETIMEAUTH_VERIFY: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::OnetimeauthVerify,
    id: "onetimeauth_verify",
    args: &[
        arg("tag", Constraint::Exact(ONETIMEAUTH_BYTES)),
        arg("message", Constraint::Any),
        arg("key", Constraint::Exact(KEY_BYTES)),
    ],
    cost_basis: CostBasis::InputLen(1),
};

static HASH: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Hash,
    id: "hash",
    args: &[arg("message", Constraint::Any)],
    cost_basis: CostBasis::InputLen(0),
};

static VERIFY_16: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Verify16,
    id: "verify_16",
    args: &[arg("x", Constraint::Exact(16)), arg("y", Constraint::Exact(16))],
    cost_basis: CostBasis::Constant,
};

static VERIFY_32: PrimitiveSpec = PrimitiveSpec {
    primitive: Primitive::Verify32,
    id: "verify_32",
    args: &[arg("x", Constraint::Exact(32)), arg("y", Constraint::Exact(32))],
    cost_basis: CostBasis::Constant,
};
