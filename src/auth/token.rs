use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::{clock::RoomClock, error::{RoomError, RoomResult}};

use super::Identity;

type HmacSha256 = Hmac<Sha256>;

/// Verifies bearer tokens of the form `<user_id>.<expires_unix>.<hex mac>`.
///
/// The mac is HMAC-SHA256 over `<user_id>.<expires_unix>` with the shared
/// secret. Tokens are issued by the account service; `issue` exists so the
/// same secret can mint tokens for operators and tests.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
    clock: RoomClock,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, clock: RoomClock) -> Self {
        Self { secret: secret.into(), clock }
    }

    pub fn issue(&self, user_id: &str, ttl: time::Duration) -> RoomResult<String> {
        let expires = (self.clock.now() + ttl).unix_timestamp();
        let payload = format!("{user_id}.{expires}");
        let mac = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!("{payload}.{}", hex::encode(mac)))
    }

    pub fn verify(&self, token: &str) -> RoomResult<Identity> {
        let (payload, signature) = token
            .rsplit_once('.')
            .ok_or_else(|| malformed("missing signature"))?;
        let (user_id, expires) = payload
            .rsplit_once('.')
            .ok_or_else(|| malformed("missing expiry"))?;
        if user_id.is_empty() {
            return Err(malformed("missing user id"));
        }

        let signature = hex::decode(signature).map_err(|_| malformed("signature is not hex"))?;
        self.mac(payload)?
            .verify_slice(&signature)
            .map_err(|_| RoomError::Authentication("token signature mismatch".into()))?;

        let expires: i64 = expires.parse().map_err(|_| malformed("expiry is not a number"))?;
        if self.clock.now().unix_timestamp() >= expires {
            debug!(user_id, "rejected expired token");
            return Err(RoomError::Authentication("token expired".into()));
        }

        Ok(Identity::User(user_id.to_owned()))
    }

    fn mac(&self, payload: &str) -> RoomResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| RoomError::Authentication("token secret is unusable".into()))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

fn malformed(why: &str) -> RoomError {
    RoomError::Authentication(format!("malformed token: {why}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new("test-secret", RoomClock::new())
    }

    #[test]
    fn issued_token_resolves_to_user() {
        let verifier = verifier();
        let token = verifier.issue("alice", time::Duration::hours(1)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), Identity::User("alice".into()));
    }

    #[test]
    fn user_ids_may_contain_dots() {
        let verifier = verifier();
        let token = verifier.issue("a.b.c", time::Duration::hours(1)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), Identity::User("a.b.c".into()));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = verifier();
        let token = verifier.issue("alice", time::Duration::seconds(-5)).unwrap();
        assert_eq!(
            verifier.verify(&token),
            Err(RoomError::Authentication("token expired".into()))
        );
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let verifier = verifier();
        let token = verifier.issue("alice", time::Duration::hours(1)).unwrap();
        let forged = token.replacen("alice", "mallory", 1);
        assert!(verifier.verify(&forged).is_err());

        let other = TokenVerifier::new("other-secret", RoomClock::new());
        assert!(other.verify(&token).is_err());

        assert!(verifier.verify("not-a-token").is_err());
        assert!(verifier.verify(".123.abcd").is_err());
    }
}
