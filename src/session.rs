//! Stateless signed session tokens.
//!
//! A token is `"<user id>-<expiry>-<signature>"` where `expiry` is a Unix
//! timestamp in seconds and `signature` is the hex HMAC-SHA256, keyed with the
//! server secret, of `"<user id>-<password digest>-<expiry>"`.
//!
//! Because the password digest is part of the signed message, changing a
//! user's password invalidates every token issued before the change. Nothing
//! is stored server-side.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::error::Error;
use crate::identity::{Identity, UserLookup};

type HmacSha256 = Hmac<Sha256>;

const DELIMITER: char = '-';

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn sign(user_id: &str, password_digest: &str, expiry: u64, secret: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = HmacSha256::new_from_slice(secret)
        .unwrap_or_else(|_| unreachable!("HMAC takes keys of any size"));
    mac.update(format!("{user_id}{DELIMITER}{password_digest}{DELIMITER}{expiry}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Issues a token for `user_id` valid until `now + max_age`.
///
/// Fails for ids that are empty or contain `-`, the field delimiter: such a
/// token could never be decoded.
pub fn encode(
    user_id: &str,
    password_digest: &str,
    max_age: u64,
    secret: &[u8],
    now: u64,
) -> Result<String, Error> {
    if user_id.is_empty() || user_id.contains(DELIMITER) {
        return Err(Error::InvalidArgument {
            name: "user_id".to_owned(),
            reason: format!("session user ids must be non-empty and free of `{DELIMITER}`"),
        });
    }
    let expiry = now.saturating_add(max_age);
    let signature = sign(user_id, password_digest, expiry, secret);
    Ok(format!("{user_id}{DELIMITER}{expiry}{DELIMITER}{signature}"))
}

/// Validates `token` and resolves its user.
///
/// Returns `None` for tokens with the wrong number of fields, an unparsable
/// or past expiry (`expiry <= now`), an unknown user, a failed lookup, or a
/// signature that does not match the user's current password digest. The
/// returned identity has its password digest redacted.
pub async fn decode(
    token: &str,
    users: &dyn UserLookup,
    secret: &[u8],
    now: u64,
) -> Option<Identity> {
    let fields: Vec<&str> = token.split(DELIMITER).collect();
    let [user_id, expiry, signature] = fields.as_slice() else {
        return None;
    };
    let expiry: u64 = expiry.parse().ok()?;
    if expiry <= now {
        return None;
    }

    let user = match users.find_user(user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "user lookup failed while decoding session");
            return None;
        }
    };

    let expected = sign(user_id, &user.passwd, expiry, secret);
    if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
        info!(user = %user_id, "invalid session signature");
        return None;
    }
    Some(user.redacted())
}

/// Digest stored for a password: hex SHA-256 of `"<user id>:<password>"`.
pub fn password_digest(user_id: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Session codec bound to the configured secret, cookie name and lifetime.
#[derive(Clone)]
pub struct SessionCodec {
    secret: Vec<u8>,
    cookie_name: String,
    max_age: u64,
}

impl SessionCodec {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            cookie_name: config.cookie_name.clone(),
            max_age: config.max_age,
        }
    }

    pub fn cookie_name(&self) -> &str { &self.cookie_name }
    pub fn max_age(&self) -> u64 { self.max_age }

    /// Token for `user`, valid for the configured max age from `now`.
    pub fn encode(&self, user: &Identity, now: u64) -> Result<String, Error> {
        encode(&user.id, &user.passwd, self.max_age, &self.secret, now)
    }

    pub async fn decode(&self, token: &str, users: &dyn UserLookup, now: u64) -> Option<Identity> {
        decode(token, users, &self.secret, now).await
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn set_cookie(&self, token: &str) -> String {
        format!("{}={token}; Max-Age={}; Path=/; HttpOnly", self.cookie_name, self.max_age)
    }

    /// `Set-Cookie` value that signs the client out.
    pub fn clear_cookie(&self) -> String {
        format!("{}=-deleted-; Max-Age=0; Path=/; HttpOnly", self.cookie_name)
    }
}

impl std::fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCodec")
            .field("cookie_name", &self.cookie_name)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::handler::BoxFuture;

    const SECRET: &[u8] = b"test-secret-key-for-unit-tests";
    const T0: u64 = 1_700_000_000;

    struct Users(HashMap<String, Identity>);

    impl UserLookup for Users {
        fn find_user<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>> {
            Box::pin(async move { Ok(self.0.get(id).cloned()) })
        }
    }

    struct Broken;

    impl UserLookup for Broken {
        fn find_user<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<Option<Identity>, Error>> {
            Box::pin(async { Err(Error::Storage("database is down".into())) })
        }
    }

    fn user(passwd: &str) -> Identity {
        Identity {
            id: "0015".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            passwd: passwd.into(),
            ..Identity::default()
        }
    }

    fn users_with(u: Identity) -> Users {
        Users(HashMap::from([(u.id.clone(), u)]))
    }

    #[tokio::test]
    async fn round_trip_resolves_the_user() {
        let u = user("digest");
        let token = encode(&u.id, &u.passwd, 86_400, SECRET, T0).unwrap();
        let found = decode(&token, &users_with(u.clone()), SECRET, T0 + 1).await.unwrap();
        assert_eq!(found.id, u.id);
        assert_eq!(found.email, u.email);
        assert_eq!(found.passwd, "******");
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let u = user("digest");
        let token = encode(&u.id, &u.passwd, 86_400, SECRET, T0).unwrap();
        let users = users_with(u);
        let sig_start = token.rfind('-').unwrap() + 1;

        for i in sig_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let forged = String::from_utf8(bytes).unwrap();
            assert!(decode(&forged, &users, SECRET, T0 + 1).await.is_none(), "position {i}");
        }
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let u = user("digest");
        let token = encode(&u.id, &u.passwd, 1, SECRET, T0).unwrap();
        let users = users_with(u);
        assert!(decode(&token, &users, SECRET, T0 + 2).await.is_none());
        assert!(decode(&token, &users, SECRET, T0 + 1).await.is_none(), "expiry == now is expired");
        assert!(decode(&token, &users, SECRET, T0).await.is_some());
    }

    #[tokio::test]
    async fn password_change_invalidates_tokens() {
        let token = encode("0015", "old", 86_400, SECRET, T0).unwrap();
        assert!(decode(&token, &users_with(user("new")), SECRET, T0 + 1).await.is_none());
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let u = user("digest");
        let token = encode(&u.id, &u.passwd, 86_400, b"other-secret", T0).unwrap();
        assert!(decode(&token, &users_with(u), SECRET, T0 + 1).await.is_none());
    }

    #[tokio::test]
    async fn malformed_and_unknown_tokens_are_rejected() {
        let users = users_with(user("digest"));
        assert!(decode("", &users, SECRET, T0).await.is_none());
        assert!(decode("0015-123", &users, SECRET, T0).await.is_none());
        assert!(decode("a-b-c-d", &users, SECRET, T0).await.is_none());
        assert!(decode("0015-notanumber-abc", &users, SECRET, T0).await.is_none());

        let token = encode("ghost", "digest", 86_400, SECRET, T0).unwrap();
        assert!(decode(&token, &users, SECRET, T0 + 1).await.is_none());
    }

    #[test]
    fn ids_containing_the_delimiter_are_refused() {
        assert!(matches!(
            encode("ada-lovelace", "digest", 86_400, SECRET, T0),
            Err(Error::InvalidArgument { ref name, .. }) if name == "user_id"
        ));
        assert!(encode("", "digest", 86_400, SECRET, T0).is_err());
    }

    #[tokio::test]
    async fn lookup_failure_means_no_identity() {
        let token = encode("0015", "digest", 86_400, SECRET, T0).unwrap();
        assert!(decode(&token, &Broken, SECRET, T0 + 1).await.is_none());
    }

    #[test]
    fn cookie_headers() {
        let codec = SessionCodec::new(&SessionConfig::default());
        assert_eq!(codec.set_cookie("t"), "awesession=t; Max-Age=86400; Path=/; HttpOnly");
        assert_eq!(codec.clear_cookie(), "awesession=-deleted-; Max-Age=0; Path=/; HttpOnly");
    }

    #[test]
    fn password_digest_is_stable_hex() {
        let d = password_digest("0015", "secret");
        assert_eq!(d.len(), 64);
        assert_eq!(d, password_digest("0015", "secret"));
        assert_ne!(d, password_digest("0016", "secret"));
    }
}
