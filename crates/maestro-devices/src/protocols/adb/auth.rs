/*!
 * Challenge signing for the ADB handshake.
 */
use std::fmt::Debug;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::device::{Device, DeviceError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs the token a device sends in `AUTH(TOKEN)`
pub trait ChallengeSigner: Send + Sync + Debug {
    /// Produce the signature returned in `AUTH(SIGNATURE)`
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>>;
}

/// HMAC-SHA256 signer over a shared pairing key
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl HmacSigner {
    /// Signer over raw key bytes
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(DeviceError::Configuration("ADB pairing key is empty".to_string()));
        }
        Ok(Self { key })
    }

    /// Signer over a base64 encoded key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| DeviceError::Configuration(format!("ADB pairing key is not valid base64: {}", e)))?;
        Self::new(key)
    }

    /// Pick the key for `device`
    ///
    /// The device's own `auth_token` wins over the configured key. Returns
    /// `None` when neither is set.
    pub fn for_device(configured_key: Option<&str>, device: &Device) -> Result<Option<Self>> {
        if let Some(token) = device.connection.auth_token.as_deref() {
            return Self::new(token.as_bytes()).map(Some);
        }
        configured_key.map(Self::from_base64).transpose()
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| DeviceError::Configuration(format!("unusable ADB pairing key: {}", e)))
    }

    /// Check a signature produced with the same key
    pub fn verify(&self, token: &[u8], signature: &[u8]) -> bool {
        match self.mac() {
            Ok(mut mac) => {
                mac.update(token);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

impl ChallengeSigner for HmacSigner {
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(token);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ConnectionType, DeviceType};

    #[test]
    fn test_sign_and_verify() {
        let signer = HmacSigner::from_base64("c2VjcmV0LWtleQ==").unwrap();
        let token = [7u8; 20];
        let signature = signer.sign(&token).unwrap();
        assert_eq!(signature.len(), 32);
        assert!(signer.verify(&token, &signature));
        assert!(!signer.verify(&[8u8; 20], &signature));

        let other = HmacSigner::new(b"another".to_vec()).unwrap();
        assert!(!other.verify(&token, &signature));
    }

    #[test]
    fn test_key_selection() {
        let device = Device::new("tv", "TV", DeviceType::Tv, ConnectionType::Adb);
        assert!(HmacSigner::for_device(None, &device).unwrap().is_none());

        let from_config = HmacSigner::for_device(Some("c2VjcmV0LWtleQ=="), &device).unwrap().unwrap();
        assert!(from_config.verify(b"t", &HmacSigner::new(b"secret-key".to_vec()).unwrap().sign(b"t").unwrap()));

        let paired = device.with_auth_token("paired");
        let from_device = HmacSigner::for_device(Some("c2VjcmV0LWtleQ=="), &paired).unwrap().unwrap();
        assert!(from_device.verify(b"t", &HmacSigner::new(b"paired".to_vec()).unwrap().sign(b"t").unwrap()));

        assert!(matches!(
            HmacSigner::for_device(Some("not base64!"), &Device::new("x", "X", DeviceType::Tv, ConnectionType::Adb)),
            Err(DeviceError::Configuration(_))
        ));
    }
}
