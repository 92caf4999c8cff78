//! Service JWT decoding
//!
//! Compact form only (`header.claims.signature`, base64url without padding).
//! Signatures are raw 64-byte `r || s`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::keys::PublicKey;
use super::AuthError;

const BEARER_PREFIX: &str = "Bearer ";

/// Token part of a `Bearer` authorization header
pub fn extract_bearer(header: &str) -> Result<&str, AuthError> {
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MalformedHeader)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Signing algorithms accepted for service tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// ECDSA over secp256k1
    Es256K,
    /// ECDSA over NIST P-256
    Es256,
}

impl Algorithm {
    pub fn parse(alg: &str) -> Result<Self, AuthError> {
        match alg {
            "ES256K" => Ok(Self::Es256K),
            "ES256" => Ok(Self::Es256),
            other => Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es256K => "ES256K",
            Self::Es256 => "ES256",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Header {
    alg: String,
}

/// `aud` may be a single string or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// Registered claims used by feed requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Lexicon method the token is bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lxm: Option<String>,
}

impl Claims {
    pub fn check_time(&self, now: i64) -> Result<(), AuthError> {
        if self.exp.is_some_and(|exp| now >= exp) {
            return Err(AuthError::Expired);
        }
        if self.nbf.is_some_and(|nbf| now < nbf) {
            return Err(AuthError::NotYetValid);
        }
        Ok(())
    }

    pub fn check_audience(&self, service_did: &str) -> Result<(), AuthError> {
        match &self.aud {
            Some(aud) if aud.contains(service_did) => Ok(()),
            _ => Err(AuthError::InvalidAudience(service_did.to_string())),
        }
    }
}

/// A decoded, not yet verified token
#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub alg: Algorithm,
    pub claims: Claims,
    signing_input: &'a str,
    signature: Vec<u8>,
}

impl<'a> Token<'a> {
    pub fn decode(raw: &'a str) -> Result<Self, AuthError> {
        let mut parts = raw.split('.');
        let (Some(header), Some(claims), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedToken(
                "token must have three segments".into(),
            ));
        };

        let header: Header = decode_segment(header, "header")?;
        let alg = Algorithm::parse(&header.alg)?;
        let claims: Claims = decode_segment(claims, "claims")?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| AuthError::MalformedToken(format!("signature: {}", e)))?;

        // Everything before the last dot is what was signed
        let signing_input = raw.rsplit_once('.').map_or(raw, |(input, _)| input);

        Ok(Self {
            alg,
            claims,
            signing_input,
            signature,
        })
    }

    /// Issuer DID without any `#service` fragment
    pub fn issuer(&self) -> Result<&str, AuthError> {
        let iss = self
            .claims
            .iss
            .as_deref()
            .filter(|iss| !iss.is_empty())
            .ok_or(AuthError::MissingIssuer)?;
        Ok(iss.split('#').next().unwrap_or(iss))
    }

    pub fn verify_signature(&self, key: &PublicKey) -> Result<(), AuthError> {
        key.verify(self.alg, self.signing_input.as_bytes(), &self.signature)
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::MalformedToken(format!("{}: {}", what, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| AuthError::MalformedToken(format!("{}: {}", what, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json)
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert_eq!(extract_bearer("Basic abc"), Err(AuthError::MalformedHeader));
        assert_eq!(extract_bearer("Bearer   "), Err(AuthError::MalformedHeader));
    }

    #[test]
    fn test_decode_splits_signing_input() {
        let raw = format!(
            "{}.{}.{}",
            segment(r#"{"alg":"ES256K","typ":"JWT"}"#),
            segment(r#"{"iss":"did:plc:abc#atproto_labeler","aud":["did:web:feeds.example"],"exp":100}"#),
            URL_SAFE_NO_PAD.encode([1u8; 64])
        );
        let token = Token::decode(&raw).unwrap();
        assert_eq!(token.alg, Algorithm::Es256K);
        assert_eq!(token.issuer().unwrap(), "did:plc:abc");
        assert_eq!(token.signature.len(), 64);
        assert_eq!(token.signing_input.matches('.').count(), 1);
        assert!(token.claims.check_audience("did:web:feeds.example").is_ok());
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(matches!(Token::decode("a.b"), Err(AuthError::MalformedToken(_))));
        assert!(matches!(Token::decode("a.b.c.d"), Err(AuthError::MalformedToken(_))));

        let hs256 = format!("{}.{}.", segment(r#"{"alg":"HS256"}"#), segment("{}"));
        assert_eq!(
            Token::decode(&hs256).err(),
            Some(AuthError::UnsupportedAlgorithm("HS256".into()))
        );
    }

    #[test]
    fn test_time_and_audience_checks() {
        let claims = Claims {
            aud: Some(Audience::One("did:web:a".into())),
            exp: Some(200),
            nbf: Some(100),
            ..Default::default()
        };
        assert_eq!(claims.check_time(50), Err(AuthError::NotYetValid));
        assert!(claims.check_time(150).is_ok());
        assert_eq!(claims.check_time(200), Err(AuthError::Expired));
        assert!(claims.check_audience("did:web:a").is_ok());
        assert!(matches!(
            claims.check_audience("did:web:b"),
            Err(AuthError::InvalidAudience(_))
        ));
        assert!(Claims::default().check_audience("did:web:a").is_err());
    }
}
