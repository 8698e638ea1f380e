//! Cryptographic helpers for O5LOGON authentication.
//!
//! Oracle's challenge/response logon uses AES-CBC with a zero IV, PBKDF2
//! with HMAC-SHA512 for the 12c verifier family, and SHA-1/MD5 for the
//! legacy 11g verifiers. These helpers are consumed by the auth codec; no
//! other part of the driver touches key material.

use aes::cipher::KeyIvInit;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut};
use md5::Md5;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha512};

use crate::constants::verifier;
use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;

const ZERO_IV: [u8; 16] = [0u8; 16];
const BLOCK: usize = 16;

/// Padding applied before AES-CBC encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Zero bytes up to the block boundary, none when already aligned
    Zero,
    /// PKCS#7, always at least one byte
    Pkcs7,
}

fn pad(plaintext: &[u8], padding: Padding) -> Vec<u8> {
    let remainder = plaintext.len() % BLOCK;
    let pad_len = match (padding, remainder) {
        (Padding::Zero, 0) => 0,
        (Padding::Zero, r) => BLOCK - r,
        (Padding::Pkcs7, r) => BLOCK - r,
    };
    let mut buf = plaintext.to_vec();
    let fill = match padding {
        Padding::Zero => 0u8,
        Padding::Pkcs7 => pad_len as u8,
    };
    buf.extend(std::iter::repeat(fill).take(pad_len));
    buf
}

fn check_key(key: &[u8], expected: usize) -> Result<()> {
    if key.len() != expected {
        return Err(Error::Internal(format!(
            "AES key must be {expected} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

fn check_ciphertext(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() % BLOCK != 0 {
        return Err(Error::Protocol(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK}",
            data.len()
        )));
    }
    Ok(())
}

/// AES-256-CBC encrypt with zero IV.
pub fn aes256_encrypt(key: &[u8], plaintext: &[u8], padding: Padding) -> Result<Vec<u8>> {
    check_key(key, 32)?;
    let mut buf = pad(plaintext, padding);
    let len = buf.len();
    let out = Aes256CbcEnc::new(key.into(), &ZERO_IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|e| Error::Internal(format!("AES encrypt: {e}")))?
        .to_vec();
    Ok(out)
}

/// AES-256-CBC decrypt with zero IV. Padding is left in place.
pub fn aes256_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_key(key, 32)?;
    check_ciphertext(ciphertext)?;
    let mut buf = ciphertext.to_vec();
    let out = Aes256CbcDec::new(key.into(), &ZERO_IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| Error::Protocol(format!("AES decrypt: {e}")))?
        .to_vec();
    Ok(out)
}

/// AES-192-CBC encrypt with zero IV (11g verifiers).
pub fn aes192_encrypt(key: &[u8], plaintext: &[u8], padding: Padding) -> Result<Vec<u8>> {
    check_key(key, 24)?;
    let mut buf = pad(plaintext, padding);
    let len = buf.len();
    let out = Aes192CbcEnc::new(key.into(), &ZERO_IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|e| Error::Internal(format!("AES encrypt: {e}")))?
        .to_vec();
    Ok(out)
}

/// AES-192-CBC decrypt with zero IV (11g verifiers).
pub fn aes192_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    check_key(key, 24)?;
    check_ciphertext(ciphertext)?;
    let mut buf = ciphertext.to_vec();
    let out = Aes192CbcDec::new(key.into(), &ZERO_IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| Error::Protocol(format!("AES decrypt: {e}")))?
        .to_vec();
    Ok(out)
}

/// PBKDF2-HMAC-SHA512 derivation.
pub fn pbkdf2_sha512(password: &[u8], salt: &[u8], iterations: u32, length: usize) -> Vec<u8> {
    let mut key = vec![0u8; length];
    pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut key);
    key
}

/// Password verifier generation negotiated by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierKind {
    /// 11g release 1 or 2 (SHA-1 based)
    V11g,
    /// 12c and later (PBKDF2 based)
    V12c,
}

impl VerifierKind {
    /// Map the wire value from AUTH_VFR_DATA.
    pub fn from_wire(value: u32) -> Result<Self> {
        match value {
            verifier::TYPE_11G_1 | verifier::TYPE_11G_2 => Ok(VerifierKind::V11g),
            verifier::TYPE_12C => Ok(VerifierKind::V12c),
            other => Err(Error::NotSupported(format!(
                "password verifier type {other:#x}"
            ))),
        }
    }
}

/// 64-byte intermediate password key for the 12c verifier; the salt is the
/// verifier data with the speedy-key tag appended.
pub fn password_key_12c(password: &[u8], verifier_data: &[u8], iterations: u32) -> Vec<u8> {
    let mut salt = verifier_data.to_vec();
    salt.extend_from_slice(b"AUTH_PBKDF2_SPEEDY_KEY");
    pbkdf2_sha512(password, &salt, iterations, 64)
}

/// 32-byte session-key-decryption key for the 12c verifier:
/// `SHA512(password_key || verifier_data)[..32]`.
pub fn password_hash_12c(password: &[u8], verifier_data: &[u8], iterations: u32) -> Vec<u8> {
    let password_key = password_key_12c(password, verifier_data, iterations);
    let mut hasher = Sha512::new();
    hasher.update(&password_key);
    hasher.update(verifier_data);
    hasher.finalize()[..32].to_vec()
}

/// 24-byte session-key-decryption key for the 11g verifiers:
/// `SHA1(password || verifier_data)` zero-extended to the AES-192 key size.
pub fn password_hash_11g(password: &[u8], verifier_data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password);
    hasher.update(verifier_data);
    let mut key = hasher.finalize().to_vec();
    key.extend_from_slice(&[0u8; 4]);
    key
}

/// Session combo key for the 12c verifier: PBKDF2 over the hex-encoded
/// concatenation of the client and server key halves.
pub fn combo_key_12c(
    server_half: &[u8],
    client_half: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<Vec<u8>> {
    if server_half.len() < 32 || client_half.len() < 32 {
        return Err(Error::Protocol("session key halves too short".into()));
    }
    let combined = format!(
        "{}{}",
        hex::encode_upper(&client_half[..32]),
        hex::encode_upper(&server_half[..32])
    );
    Ok(pbkdf2_sha512(combined.as_bytes(), salt, iterations, 32))
}

/// Session combo key for the 11g verifiers: MD5 over the XOR of the middle
/// 24 bytes of the two halves.
pub fn combo_key_11g(server_half: &[u8], client_half: &[u8]) -> Result<Vec<u8>> {
    if server_half.len() < 40 || client_half.len() < 40 {
        return Err(Error::Protocol("session key halves too short".into()));
    }
    let mut mixed = [0u8; 24];
    for (i, m) in mixed.iter_mut().enumerate() {
        *m = server_half[16 + i] ^ client_half[16 + i];
    }
    let head = Md5::digest(&mixed[..16]);
    let tail = Md5::digest(&mixed[16..]);
    let mut key = head.to_vec();
    key.extend_from_slice(&tail);
    key.truncate(24);
    Ok(key)
}

/// Random 16-byte salt prepended to the password before encryption.
pub fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Random client session key half.
pub fn random_key_half(length: usize) -> Vec<u8> {
    let mut key = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes256_round_trip_zero_padding() {
        let key = [0x42u8; 32];
        let plaintext = b"sixteen byte blk";
        let ciphertext = aes256_encrypt(&key, plaintext, Padding::Zero).unwrap();
        assert_eq!(ciphertext.len(), 16);
        let decrypted = aes256_decrypt(&key, &ciphertext).unwrap();
        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn aes256_pkcs7_always_pads() {
        let key = [0x01u8; 32];
        let ciphertext = aes256_encrypt(&key, &[0u8; 16], Padding::Pkcs7).unwrap();
        assert_eq!(ciphertext.len(), 32);
        let decrypted = aes256_decrypt(&key, &ciphertext).unwrap();
        assert_eq!(&decrypted[16..], &[16u8; 16]);
    }

    #[test]
    fn aes192_round_trip() {
        let key = [0x24u8; 24];
        let plaintext = b"hello";
        let ciphertext = aes192_encrypt(&key, plaintext, Padding::Pkcs7).unwrap();
        let decrypted = aes192_decrypt(&key, &ciphertext).unwrap();
        assert!(decrypted.starts_with(plaintext));
    }

    #[test]
    fn key_length_enforced() {
        assert!(aes256_encrypt(&[0u8; 16], b"x", Padding::Zero).is_err());
        assert!(aes192_decrypt(&[0u8; 32], &[0u8; 16]).is_err());
        assert!(aes256_decrypt(&[0u8; 32], &[0u8; 15]).is_err());
    }

    #[test]
    fn pbkdf2_is_deterministic() {
        let a = pbkdf2_sha512(b"tiger", b"salt", 4096, 64);
        let b = pbkdf2_sha512(b"tiger", b"salt", 4096, 64);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let c = pbkdf2_sha512(b"tiger", b"pepper", 4096, 64);
        assert_ne!(a, c);
    }

    #[test]
    fn verifier_kind_mapping() {
        assert_eq!(VerifierKind::from_wire(0xb152).unwrap(), VerifierKind::V11g);
        assert_eq!(VerifierKind::from_wire(0x1b25).unwrap(), VerifierKind::V11g);
        assert_eq!(VerifierKind::from_wire(0x4815).unwrap(), VerifierKind::V12c);
        assert!(VerifierKind::from_wire(0x9999).is_err());
    }

    #[test]
    fn password_hash_shapes() {
        let h12 = password_hash_12c(b"tiger", &[0xAB; 16], 4096);
        assert_eq!(h12.len(), 32);
        let h11 = password_hash_11g(b"tiger", &[0xAB; 16]);
        assert_eq!(h11.len(), 24);
        assert_eq!(&h11[20..], &[0, 0, 0, 0]);
    }

    #[test]
    fn combo_key_11g_shape() {
        let a = vec![0x11u8; 48];
        let b = vec![0x22u8; 48];
        let key = combo_key_11g(&a, &b).unwrap();
        assert_eq!(key.len(), 24);
        assert!(combo_key_11g(&a[..20], &b).is_err());
    }

    #[test]
    fn combo_key_12c_shape() {
        let a = vec![0x11u8; 32];
        let b = vec![0x22u8; 32];
        let key = combo_key_12c(&a, &b, b"salt", 3).unwrap();
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn random_material_varies() {
        assert_ne!(random_salt(), random_salt());
        assert_ne!(random_key_half(32), random_key_half(32));
    }
}
