use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// A verified caller. `owner` is the key jobs and indexes are filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner: String,
}

/// Exchanges a bearer credential for a verified [`Identity`].
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// HS256 bearer tokens signed with a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(credential, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Malformed(e.to_string()),
            }
        })?;

        let owner = data.claims.email.trim().to_lowercase();
        if owner.is_empty() {
            return Err(AuthError::MissingClaim("email"));
        }

        Ok(Identity { owner })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Token is missing the {0} claim")]
    MissingClaim(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, email: &str, exp: usize) -> String {
        let claims = Claims {
            sub: "user-1".into(),
            email: email.into(),
            exp,
            aud: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn test_verify_lowercases_email_into_owner() {
        let verifier = JwtVerifier::new("s3cret", None);
        let identity = verifier
            .verify(&token("s3cret", "Alice@Example.com", far_future()))
            .unwrap();
        assert_eq!(identity.owner, "alice@example.com");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let verifier = JwtVerifier::new("s3cret", None);
        let err = verifier
            .verify(&token("other", "a@b.com", far_future()))
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let verifier = JwtVerifier::new("s3cret", None);
        let err = verifier.verify(&token("s3cret", "a@b.com", 1_000)).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let verifier = JwtVerifier::new("s3cret", None);
        assert!(matches!(
            verifier.verify("not-a-token"),
            Err(AuthError::Malformed(_))
        ));
    }
}
