//! atproto signing keys
//!
//! Keys arrive as multibase (`z` + base58btc) strings. `Multikey` values carry
//! a multicodec prefix naming the curve; the legacy verification-method types
//! carry the bare compressed point.

use async_trait::async_trait;
use k256::ecdsa::signature::Verifier as _;

use super::jwt::Algorithm;
use super::AuthError;

const SECP256K1_PUB: [u8; 2] = [0xe7, 0x01];
const P256_PUB: [u8; 2] = [0x80, 0x24];

/// Looks up the current signing key of a DID
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn signing_key(&self, did: &str) -> Result<PublicKey, AuthError>;
}

/// Public half of an atproto signing key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    K256(k256::ecdsa::VerifyingKey),
    P256(p256::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Parse a `Multikey` `publicKeyMultibase` value
    pub fn from_multikey(multibase: &str) -> Result<Self, AuthError> {
        let bytes = decode_multibase(multibase)?;
        if let Some(point) = bytes.strip_prefix(&SECP256K1_PUB) {
            return Self::k256(point);
        }
        if let Some(point) = bytes.strip_prefix(&P256_PUB) {
            return Self::p256(point);
        }
        Err(AuthError::Resolution("unknown multicodec key type".into()))
    }

    /// Parse a verification method by its `type`
    pub fn from_verification_method(method_type: &str, multibase: &str) -> Result<Self, AuthError> {
        match method_type {
            "Multikey" => Self::from_multikey(multibase),
            "EcdsaSecp256k1VerificationKey2019" => Self::k256(&decode_multibase(multibase)?),
            "EcdsaSecp256r1VerificationKey2019" => Self::p256(&decode_multibase(multibase)?),
            other => Err(AuthError::Resolution(format!(
                "unsupported verification method type {}",
                other
            ))),
        }
    }

    fn k256(point: &[u8]) -> Result<Self, AuthError> {
        k256::ecdsa::VerifyingKey::from_sec1_bytes(point)
            .map(Self::K256)
            .map_err(|e| AuthError::Resolution(format!("invalid secp256k1 key: {}", e)))
    }

    fn p256(point: &[u8]) -> Result<Self, AuthError> {
        p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
            .map(Self::P256)
            .map_err(|e| AuthError::Resolution(format!("invalid P-256 key: {}", e)))
    }

    /// `Multikey` encoding of this key
    pub fn to_multikey(&self) -> String {
        let mut bytes = Vec::with_capacity(35);
        match self {
            Self::K256(key) => {
                bytes.extend_from_slice(&SECP256K1_PUB);
                bytes.extend_from_slice(key.to_encoded_point(true).as_bytes());
            }
            Self::P256(key) => {
                bytes.extend_from_slice(&P256_PUB);
                bytes.extend_from_slice(key.to_encoded_point(true).as_bytes());
            }
        }
        format!("z{}", bs58::encode(bytes).into_string())
    }

    /// Check a raw `r || s` signature over `message`.
    ///
    /// High-S signatures are normalized before verification.
    pub fn verify(&self, alg: Algorithm, message: &[u8], signature: &[u8]) -> Result<(), AuthError> {
        match (self, alg) {
            (Self::K256(key), Algorithm::Es256K) => {
                let sig = k256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| AuthError::BadSignature)?;
                let sig = sig.normalize_s().unwrap_or(sig);
                key.verify(message, &sig).map_err(|_| AuthError::BadSignature)
            }
            (Self::P256(key), Algorithm::Es256) => {
                let sig = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| AuthError::BadSignature)?;
                let sig = sig.normalize_s().unwrap_or(sig);
                key.verify(message, &sig).map_err(|_| AuthError::BadSignature)
            }
            _ => Err(AuthError::BadSignature),
        }
    }
}

fn decode_multibase(value: &str) -> Result<Vec<u8>, AuthError> {
    let encoded = value
        .strip_prefix('z')
        .ok_or_else(|| AuthError::Resolution("key is not base58btc multibase".into()))?;
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| AuthError::Resolution(format!("invalid base58 key: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::Signer;

    #[test]
    fn test_multikey_round_trip_and_verify() {
        let signing = k256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
        let public = PublicKey::K256(k256::ecdsa::VerifyingKey::from(&signing));
        let multikey = public.to_multikey();
        assert!(multikey.starts_with("zQ3s"));
        assert_eq!(PublicKey::from_multikey(&multikey).unwrap(), public);

        let signature: k256::ecdsa::Signature = signing.sign(b"header.claims");
        let raw = signature.to_bytes();
        assert!(public.verify(Algorithm::Es256K, b"header.claims", &raw).is_ok());
        assert_eq!(
            public.verify(Algorithm::Es256K, b"header.other", &raw),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            public.verify(Algorithm::Es256, b"header.claims", &raw),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_p256_multikey() {
        let signing = p256::ecdsa::SigningKey::from_slice(&[9u8; 32]).unwrap();
        let public = PublicKey::P256(p256::ecdsa::VerifyingKey::from(&signing));
        assert!(public.to_multikey().starts_with("zDn"));

        let signature: p256::ecdsa::Signature = signing.sign(b"payload");
        assert!(public
            .verify(Algorithm::Es256, b"payload", &signature.to_bytes())
            .is_ok());
    }

    #[test]
    fn test_legacy_method_without_prefix() {
        let signing = k256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(true);
        let legacy = format!("z{}", bs58::encode(point.as_bytes()).into_string());
        assert!(PublicKey::from_verification_method("EcdsaSecp256k1VerificationKey2019", &legacy).is_ok());
        assert!(PublicKey::from_verification_method("Ed25519VerificationKey2020", &legacy).is_err());
        assert!(PublicKey::from_multikey("uABC").is_err());
    }
}
