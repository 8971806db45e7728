//! Cryptographic adapters binding the wire protocol together: an RSA key
//! pair for the handshake secret, and a per-session AES-256-GCM cipher
//! keyed from the negotiated passphrase.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::TunnelError;

const AES_NONCE_LEN: usize = 12;
const RSA_KEY_BITS: usize = 2048;

/// Holds the server's RSA key pair. The public half is handed out over
/// `GET /` so clients can encrypt their passphrase toward it.
pub struct RsaKeys {
    private: RsaPrivateKey,
}

impl RsaKeys {
    pub fn generate() -> Result<Self, TunnelError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|e| {
            tracing::error!(error = %e, "failed to generate RSA key pair");
            TunnelError::ConnectFailed
        })?;
        Ok(Self { private })
    }

    /// Public key serialized as SPKI PEM (`-----BEGIN PUBLIC KEY-----`),
    /// returned verbatim by `GET /`.
    pub fn public_pem(&self) -> Result<String, TunnelError> {
        let public = RsaPublicKey::from(&self.private);
        public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| TunnelError::InvalidSecret)
    }

    /// Decrypts a base-64 RSA-OAEP(SHA-256) ciphertext, returning the
    /// recovered plaintext passphrase bytes.
    pub fn decrypt(&self, secret_b64: &str) -> Result<Vec<u8>, TunnelError> {
        let ciphertext = BASE64
            .decode(secret_b64)
            .map_err(|_| TunnelError::InvalidSecret)?;
        self.private
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|_| TunnelError::InvalidSecret)
    }
}

/// The per-session symmetric cipher. Keyed by `SHA-256(passphrase)`, used
/// to encrypt/decrypt every token exchanged after the handshake.
#[derive(Clone)]
pub struct SymmetricCipher {
    cipher: Aes256Gcm,
}

impl SymmetricCipher {
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        let digest = Sha256::digest(passphrase);
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext`, returning base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut nonce_bytes = [0u8; AES_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        // A random per-message nonce can't fail to encrypt under a valid key.
        let mut out = self
            .cipher
            .encrypt(nonce, plaintext)
            .expect("aes-gcm encryption with a fresh nonce cannot fail");
        let mut buf = nonce_bytes.to_vec();
        buf.append(&mut out);
        BASE64.encode(buf)
    }

    /// Inverts [`SymmetricCipher::encrypt`]; fails with `InvalidToken` on
    /// malformed base64, a short buffer, or an authentication failure.
    pub fn decrypt(&self, token_b64: &str) -> Result<Vec<u8>, TunnelError> {
        let raw = BASE64
            .decode(token_b64)
            .map_err(|_| TunnelError::InvalidToken)?;
        if raw.len() < AES_NONCE_LEN {
            return Err(TunnelError::InvalidToken);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(AES_NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TunnelError::InvalidToken)
    }

    /// Convenience for decrypting a token expected to be UTF-8 (target
    /// `host:port`, nonce timestamps, tokenid lists).
    pub fn decrypt_utf8(&self, token_b64: &str) -> Result<String, TunnelError> {
        let raw = self.decrypt(token_b64)?;
        String::from_utf8(raw).map_err(|_| TunnelError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_round_trip() {
        let keys = RsaKeys::generate().unwrap();
        let public = RsaPublicKey::from(&keys.private);
        let mut rng = rand::thread_rng();
        let ciphertext = public
            .encrypt(&mut rng, Oaep::new::<Sha256>(), b"hunter2")
            .unwrap();
        let encoded = BASE64.encode(ciphertext);
        let recovered = keys.decrypt(&encoded).unwrap();
        assert_eq!(recovered, b"hunter2");
    }

    #[test]
    fn rsa_decrypt_rejects_garbage() {
        let keys = RsaKeys::generate().unwrap();
        let err = keys.decrypt(&BASE64.encode(b"not a real ciphertext padding")).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidSecret));
    }

    #[test]
    fn public_pem_has_expected_header() {
        let keys = RsaKeys::generate().unwrap();
        let pem = keys.public_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn aes_round_trip() {
        let cipher = SymmetricCipher::from_passphrase(b"passphrase");
        let token = cipher.encrypt(b"127.0.0.1:9000");
        let recovered = cipher.decrypt_utf8(&token).unwrap();
        assert_eq!(recovered, "127.0.0.1:9000");
    }

    #[test]
    fn aes_decrypt_detects_tamper() {
        let cipher = SymmetricCipher::from_passphrase(b"passphrase");
        let mut token = BASE64.decode(cipher.encrypt(b"payload")).unwrap();
        *token.last_mut().unwrap() ^= 0xFF;
        let tampered = BASE64.encode(token);
        assert!(matches!(cipher.decrypt(&tampered), Err(TunnelError::InvalidToken)));
    }

    #[test]
    fn aes_decrypt_rejects_wrong_key() {
        let cipher_a = SymmetricCipher::from_passphrase(b"alpha");
        let cipher_b = SymmetricCipher::from_passphrase(b"beta");
        let token = cipher_a.encrypt(b"secret");
        assert!(matches!(cipher_b.decrypt(&token), Err(TunnelError::InvalidToken)));
    }

    #[test]
    fn aes_decrypt_rejects_short_buffer() {
        let cipher = SymmetricCipher::from_passphrase(b"passphrase");
        let short = BASE64.encode(b"short");
        assert!(matches!(cipher.decrypt(&short), Err(TunnelError::InvalidToken)));
    }
}
