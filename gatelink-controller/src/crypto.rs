//! Encoding helpers for the P-256 handshake
//!
//! Platform signers hand back DER and uncompressed SEC1 points; the device
//! wants raw `r || s` and 33-byte compressed keys.

use gatelink_proto::{COMPRESSED_KEY_LEN, KeyRecord, NONCE_LEN, SIGNATURE_LEN};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

const UNCOMPRESSED_KEY_LEN: usize = 65;
const SCALAR_LEN: usize = 32;

/// Compress an uncompressed SEC1 point (`04 || X || Y`)
///
/// The prefix is `02` when Y is even and `03` when it is odd.
pub fn compress_point(uncompressed: &[u8]) -> Result<[u8; COMPRESSED_KEY_LEN], CryptoError> {
    if uncompressed.len() != UNCOMPRESSED_KEY_LEN {
        return Err(CryptoError::InvalidKeyFormat(format!(
            "expected {UNCOMPRESSED_KEY_LEN}-byte uncompressed point, got {} bytes",
            uncompressed.len()
        )));
    }
    if uncompressed[0] != 0x04 {
        return Err(CryptoError::InvalidKeyFormat(format!(
            "expected uncompressed point prefix 0x04, got 0x{:02x}",
            uncompressed[0]
        )));
    }

    let y_last = uncompressed[UNCOMPRESSED_KEY_LEN - 1];
    let mut out = [0u8; COMPRESSED_KEY_LEN];
    out[0] = if y_last & 1 == 0 { 0x02 } else { 0x03 };
    out[1..].copy_from_slice(&uncompressed[1..1 + SCALAR_LEN]);
    Ok(out)
}

/// Convert a DER ECDSA signature (`30 len 02 rlen r 02 slen s`) to raw `r || s`
pub fn der_to_raw(der: &[u8]) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
    let (&tag, rest) = der
        .split_first()
        .ok_or(CryptoError::SignatureDecode("empty signature"))?;
    if tag != 0x30 {
        return Err(CryptoError::SignatureDecode("missing SEQUENCE tag"));
    }
    let (len, body) = read_length(rest)?;
    if body.len() != len {
        return Err(CryptoError::SignatureDecode("sequence length mismatch"));
    }

    let (r, body) = read_integer(body)?;
    let (s, body) = read_integer(body)?;
    if !body.is_empty() {
        return Err(CryptoError::SignatureDecode("trailing bytes after s"));
    }

    let mut out = [0u8; SIGNATURE_LEN];
    put_scalar(&mut out[..SCALAR_LEN], r)?;
    put_scalar(&mut out[SCALAR_LEN..], s)?;
    Ok(out)
}

fn read_length(data: &[u8]) -> Result<(usize, &[u8]), CryptoError> {
    let (&first, rest) = data
        .split_first()
        .ok_or(CryptoError::SignatureDecode("missing length"))?;
    match first {
        0x00..=0x7f => Ok((first as usize, rest)),
        // long form with one length byte; P-256 signatures never need more
        0x81 => {
            let (&len, rest) = rest
                .split_first()
                .ok_or(CryptoError::SignatureDecode("truncated length"))?;
            Ok((len as usize, rest))
        }
        _ => Err(CryptoError::SignatureDecode("unsupported length encoding")),
    }
}

fn read_integer(data: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    let (&tag, rest) = data
        .split_first()
        .ok_or(CryptoError::SignatureDecode("missing INTEGER"))?;
    if tag != 0x02 {
        return Err(CryptoError::SignatureDecode("missing INTEGER tag"));
    }
    let (len, rest) = read_length(rest)?;
    if len == 0 {
        return Err(CryptoError::SignatureDecode("empty INTEGER"));
    }
    if rest.len() < len {
        return Err(CryptoError::SignatureDecode("INTEGER length exceeds sequence"));
    }
    Ok(rest.split_at(len))
}

fn put_scalar(dst: &mut [u8], mut value: &[u8]) -> Result<(), CryptoError> {
    while value.len() > SCALAR_LEN && value[0] == 0 {
        value = &value[1..];
    }
    if value.len() > SCALAR_LEN {
        return Err(CryptoError::SignatureDecode("INTEGER longer than 32 bytes"));
    }
    let offset = SCALAR_LEN - value.len();
    dst[..offset].fill(0);
    dst[offset..].copy_from_slice(value);
    Ok(())
}

/// `SHA-256(server_nonce || client_nonce)`, the value the client signs
pub fn handshake_digest(server_nonce: &[u8; NONCE_LEN], client_nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_nonce);
    hasher.update(client_nonce);
    hasher.finalize().into()
}

/// Check that a record's material is a usable public key
///
/// Ed25519 material must decode as an Edwards point, secp256r1 material as
/// the X coordinate of a P-256 point with the record's parity.
pub fn validate_key_material(record: &KeyRecord) -> Result<(), CryptoError> {
    match record.compressed_point() {
        Some(point) => p256::PublicKey::from_sec1_bytes(&point)
            .map(|_| ())
            .map_err(|_| CryptoError::InvalidKeyFormat("not a point on P-256".into())),
        None => ed25519_dalek::VerifyingKey::from_bytes(record.material())
            .map(|_| ())
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("not an Ed25519 key: {e}"))),
    }
}
