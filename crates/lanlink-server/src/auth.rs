//! Connection auth tokens.
//!
//! A token is `<user-id>.<mac>` where the mac is a keyed BLAKE3 hash of
//! the user id under the process auth secret.  Token issuance belongs to
//! the login flow outside this engine; this module only verifies that a
//! presented identity is genuine before any state is touched.

use subtle::ConstantTimeEq;

use lanlink_shared::constants::KDF_CONTEXT_AUTH_TOKEN;
use lanlink_shared::UserId;

fn token_mac(user: UserId, secret: &str) -> [u8; 32] {
    let key = blake3::derive_key(KDF_CONTEXT_AUTH_TOKEN, secret.as_bytes());
    *blake3::keyed_hash(&key, user.to_string().as_bytes()).as_bytes()
}

/// Produce a token for a user.  Used by the login collaborator and by
/// tests; the server itself only verifies.
pub fn issue_token(user: UserId, secret: &str) -> String {
    format!("{}.{}", user, hex::encode(token_mac(user, secret)))
}

/// Verify a presented token.  Returns the authenticated user id, or
/// `None` for any malformed or forged token.
pub fn verify_token(token: &str, secret: &str) -> Option<UserId> {
    let (id_part, mac_part) = token.split_once('.')?;
    let user = UserId::parse(id_part).ok()?;

    let presented = hex::decode(mac_part).ok()?;
    let expected = token_mac(user, secret);

    if presented.len() != expected.len() {
        return None;
    }
    if presented.ct_eq(&expected).unwrap_u8() != 1 {
        return None;
    }

    Some(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-auth-secret";

    #[test]
    fn issue_verify_round_trip() {
        let user = UserId::new();
        let token = issue_token(user, SECRET);
        assert_eq!(verify_token(&token, SECRET), Some(user));
    }

    #[test]
    fn wrong_secret_fails() {
        let user = UserId::new();
        let token = issue_token(user, SECRET);
        assert_eq!(verify_token(&token, "other-secret"), None);
    }

    #[test]
    fn tampered_user_id_fails() {
        let user = UserId::new();
        let token = issue_token(user, SECRET);
        let mac = token.split_once('.').unwrap().1;
        let forged = format!("{}.{}", UserId::new(), mac);
        assert_eq!(verify_token(&forged, SECRET), None);
    }

    #[test]
    fn malformed_token_fails() {
        assert_eq!(verify_token("", SECRET), None);
        assert_eq!(verify_token("no-separator", SECRET), None);
        assert_eq!(verify_token("not-a-uuid.abcd", SECRET), None);
    }
}
