//! Node identity material — Reality key pair, UUID, short id and port.
//!
//! Keys are X25519 and travel as URL-safe unpadded base64, which is what
//! `sing-box generate reality-keypair` emits. Every random byte comes from the
//! OS generator through the fallible `try_fill_bytes`, so an exhausted or
//! broken entropy source surfaces as [`AppError::CryptoFailure`] instead of a
//! panic.

use std::net::{Ipv4Addr, TcpListener};

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_core::{OsRng, RngCore};
use tracing::debug;
use uuid::Builder;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::PortRange;
use crate::error::AppError;

/// Encoded X25519 key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

/// Generate a fresh Reality key pair.
pub fn generate_keypair() -> Result<KeyPair, AppError> {
    let seed: [u8; 32] = random_bytes()?;
    let secret = StaticSecret::from(seed);
    let public = public_from_secret(&secret)?;

    Ok(KeyPair {
        private_key: URL_SAFE_NO_PAD.encode(secret.to_bytes()),
        public_key: URL_SAFE_NO_PAD.encode(public),
    })
}

/// Derive the public key for a private key in any common base64 flavour.
///
/// Accepted, tried in order: URL-safe unpadded, URL-safe padded, standard
/// unpadded, standard padded. The result is always URL-safe unpadded.
pub fn derive_public_key(private_key: &str) -> Result<String, AppError> {
    let raw = decode_flexible(private_key.trim())?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| AppError::InvalidKeyLength(raw.len()))?;

    let public = public_from_secret(&StaticSecret::from(bytes))?;
    Ok(URL_SAFE_NO_PAD.encode(public))
}

/// Random version-4 UUID, lowercase hyphenated.
pub fn new_identifier() -> Result<String, AppError> {
    let bytes: [u8; 16] = random_bytes()?;
    // from_random_bytes forces version nibble 0100 and variant bits 10.
    Ok(Builder::from_random_bytes(bytes)
        .into_uuid()
        .hyphenated()
        .to_string())
}

/// 8 random bytes as 16 lowercase hex characters.
pub fn new_short_id() -> Result<String, AppError> {
    let bytes: [u8; 8] = random_bytes()?;
    Ok(hex::encode(bytes))
}

/// Pick a random port in `range` that can currently be bound.
///
/// The listener is dropped before returning, so another process may still win
/// the port before sing-box starts; sing-box then fails loudly on its own.
pub fn allocate_free_port(range: &PortRange) -> Result<u16, AppError> {
    let mut rng = StdRng::from_rng(OsRng)
        .map_err(|e| AppError::CryptoFailure(format!("cannot seed port sampler: {e}")))?;

    for attempt in 1..=range.attempts {
        let port = rng.gen_range(range.min..=range.max);
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)) {
            Ok(listener) => {
                drop(listener);
                debug!(port, attempt, "allocated free port");
                return Ok(port);
            }
            Err(e) => debug!(port, attempt, error = %e, "port busy"),
        }
    }

    Err(AppError::NoFreePort { attempts: range.attempts })
}

// ── internals ────────────────────────────────────────────────────────────────

fn random_bytes<const N: usize>() -> Result<[u8; N], AppError> {
    let mut buf = [0u8; N];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| AppError::CryptoFailure(format!("os random source failed: {e}")))?;
    Ok(buf)
}

fn public_from_secret(secret: &StaticSecret) -> Result<[u8; 32], AppError> {
    let public = PublicKey::from(secret).to_bytes();
    // Clamping makes this unreachable for real scalars; reject it anyway.
    if public == [0u8; 32] {
        return Err(AppError::CryptoFailure("derived an all-zero public key".into()));
    }
    Ok(public)
}

// Lenient about non-zero trailing bits, like most other base64 decoders.
const fn lenient(alphabet: &alphabet::Alphabet, padding: DecodePaddingMode) -> GeneralPurpose {
    GeneralPurpose::new(
        alphabet,
        GeneralPurposeConfig::new()
            .with_encode_padding(false)
            .with_decode_allow_trailing_bits(true)
            .with_decode_padding_mode(padding),
    )
}

const DECODERS: [GeneralPurpose; 4] = [
    lenient(&alphabet::URL_SAFE, DecodePaddingMode::RequireNone),
    lenient(&alphabet::URL_SAFE, DecodePaddingMode::RequireCanonical),
    lenient(&alphabet::STANDARD, DecodePaddingMode::RequireNone),
    lenient(&alphabet::STANDARD, DecodePaddingMode::RequireCanonical),
];

fn decode_flexible(s: &str) -> Result<Vec<u8>, AppError> {
    let mut last_err = None;
    for engine in &DECODERS {
        match engine.decode(s) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(AppError::InvalidKeyEncoding(
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "empty input".into()),
    ))
}

// ── tests ─────────────────────────────────────────────────────────────────────
