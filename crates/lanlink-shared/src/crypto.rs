//! Conversation-key derivation and message-body encryption.
//!
//! Every conversation (a pair of users, or a network group) has a symmetric
//! key derived deterministically from its identity plus a process-wide
//! secret, so any two parties to the conversation derive the same key
//! without a key exchange.  Bodies are sealed with XChaCha20-Poly1305,
//! nonce prepended.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{GROUP_KEY_MARKER, KDF_CONTEXT_CONVERSATION_KEY, NONCE_SIZE};
use crate::error::CryptoError;
use crate::types::{GroupKey, UserId};

pub type SymmetricKey = [u8; 32];

// BLAKE3 KDF with domain separation
fn derive_key(parts: &[&str], secret: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_CONVERSATION_KEY);
    hasher.update(parts.join(":").as_bytes());
    hasher.update(secret.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Derive the key for a direct conversation between two users.
///
/// The two ids are sorted lexicographically first, so
/// `direct_key(a, b, s) == direct_key(b, a, s)` for every pair.
pub fn direct_key(a: UserId, b: UserId, secret: &str) -> SymmetricKey {
    let mut ids = [a.to_string(), b.to_string()];
    ids.sort();
    derive_key(&[&ids[0], &ids[1]], secret)
}

/// Derive the key for a network group's conversation.
pub fn group_conversation_key(group: &GroupKey, secret: &str) -> SymmetricKey {
    derive_key(&[group.as_str(), GROUP_KEY_MARKER], secret)
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt an optional message body.  Absent input yields absent output --
/// file-only messages have no text to seal.
///
/// Returns nonce || ciphertext (24 bytes nonce prepended).
pub fn encrypt_content(
    plaintext: Option<&str>,
    key: &SymmetricKey,
) -> Result<Option<Vec<u8>>, CryptoError> {
    let Some(plaintext) = plaintext else {
        return Ok(None);
    };

    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(Some(output))
}

/// Decrypt a sealed message body back to text.
///
/// Only used by collaborators that display history; the routing path never
/// decrypts.
pub fn decrypt_content(data: &[u8], key: &SymmetricKey) -> Result<String, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}
