// MIT License - Copyright (c) 2026 Peter Wright
// Session key derivation and AES-CBC framing

use std::fmt;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::constants::{BLOCK_SIZE, IV_SALT, KEY_LEN, SIGN_SALT};
use crate::error::{AirconError, Result};
use crate::protocol::SealedFrame;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// 256-bit digest of the authentication context.
pub fn derive_key(material: &[u8]) -> [u8; KEY_LEN] {
    Sha256::digest(material).into()
}

/// Digest of `material ‖ salt`, truncated to the cipher block size.
pub fn derive_iv(material: &[u8], salt: &[u8]) -> [u8; BLOCK_SIZE] {
    let digest = Sha256::new()
        .chain_update(material)
        .chain_update(salt)
        .finalize();
    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&digest[..BLOCK_SIZE]);
    iv
}

/// AES-256-CBC with PKCS#7 padding under a fixed key/IV pair.
///
/// Each call starts from the configured IV, so `encrypt` is deterministic
/// for a given key, IV and plaintext.
#[derive(Clone)]
pub struct CryptoCodec {
    key: [u8; KEY_LEN],
    iv: [u8; BLOCK_SIZE],
}

impl CryptoCodec {
    pub fn new(key: [u8; KEY_LEN], iv: [u8; BLOCK_SIZE]) -> Self {
        Self { key, iv }
    }

    /// Key and IV both derived from the same authentication context.
    pub fn from_material(material: &[u8]) -> Self {
        Self::new(derive_key(material), derive_iv(material, IV_SALT))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Fails with [`AirconError::Crypto`] when the ciphertext is not whole
    /// blocks or the padding does not check out, which means the key is wrong.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(AirconError::crypto(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| AirconError::crypto("invalid block padding"))
    }
}

impl fmt::Debug for CryptoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoCodec").finish_non_exhaustive()
    }
}

/// Nonces exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeNonces {
    pub random_1: String,
    pub time_1: u64,
    pub random_2: String,
    pub time_2: u64,
}

impl HandshakeNonces {
    /// Authentication context for traffic sent by the gateway.
    fn gateway_context(&self, secret: &[u8]) -> Vec<u8> {
        [
            secret,
            self.random_1.as_bytes(),
            self.random_2.as_bytes(),
            self.time_1.to_string().as_bytes(),
            self.time_2.to_string().as_bytes(),
        ]
        .concat()
    }

    /// Authentication context for traffic sent by the device.
    fn device_context(&self, secret: &[u8]) -> Vec<u8> {
        [
            secret,
            self.random_2.as_bytes(),
            self.random_1.as_bytes(),
            self.time_2.to_string().as_bytes(),
            self.time_1.to_string().as_bytes(),
        ]
        .concat()
    }
}

/// Which end of the link a [`SessionCipher`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gateway,
    Device,
}

/// One direction of traffic: cipher plus signing key.
#[derive(Clone)]
pub struct DirectionKeys {
    codec: CryptoCodec,
    sign_key: [u8; KEY_LEN],
}

impl DirectionKeys {
    pub fn from_context(context: &[u8]) -> Self {
        let mut salted = context.to_vec();
        salted.extend_from_slice(SIGN_SALT);
        Self {
            codec: CryptoCodec::from_material(context),
            sign_key: derive_key(&salted),
        }
    }

    pub fn sign(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.sign_key)
            .map_err(|_| AirconError::crypto("invalid signing key"))?;
        mac.update(plaintext);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Encrypt and sign a plaintext envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedFrame> {
        Ok(SealedFrame {
            enc: STANDARD.encode(self.codec.encrypt(plaintext)),
            sign: STANDARD.encode(self.sign(plaintext)?),
        })
    }

    /// Decrypt a frame and check its signature.
    pub fn open(&self, frame: &SealedFrame) -> Result<Vec<u8>> {
        let ciphertext = STANDARD
            .decode(&frame.enc)
            .map_err(|e| AirconError::crypto(format!("enc is not base64: {e}")))?;
        let signature = STANDARD
            .decode(&frame.sign)
            .map_err(|e| AirconError::crypto(format!("sign is not base64: {e}")))?;
        let plaintext = self.codec.decrypt(&ciphertext)?;

        let mut mac = HmacSha256::new_from_slice(&self.sign_key)
            .map_err(|_| AirconError::crypto("invalid signing key"))?;
        mac.update(&plaintext);
        mac.verify_slice(&signature)
            .map_err(|_| AirconError::crypto("signature mismatch"))?;

        debug!("Decrypted: {}", String::from_utf8_lossy(&plaintext));
        Ok(plaintext)
    }
}

/// Both directions of one session, as seen from one end of the link.
///
/// Recreated on every handshake and never shared between devices.
#[derive(Clone)]
pub struct SessionCipher {
    outbound: DirectionKeys,
    inbound: DirectionKeys,
}

impl SessionCipher {
    pub fn derive(secret: &[u8], nonces: &HandshakeNonces, role: Role) -> Self {
        let gateway = DirectionKeys::from_context(&nonces.gateway_context(secret));
        let device = DirectionKeys::from_context(&nonces.device_context(secret));
        match role {
            Role::Gateway => Self {
                outbound: gateway,
                inbound: device,
            },
            Role::Device => Self {
                outbound: device,
                inbound: gateway,
            },
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedFrame> {
        self.outbound.seal(plaintext)
    }

    pub fn open(&self, frame: &SealedFrame) -> Result<Vec<u8>> {
        self.inbound.open(frame)
    }
}

impl fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}

/// Decrypt the shared secret from a cloud-cached blob (base64 ciphertext)
/// using the same key/IV schedule as a session.
pub fn decrypt_cached_secret(auth_context: &[u8], blob: &str) -> Result<String> {
    let ciphertext = STANDARD
        .decode(blob.trim())
        .map_err(|e| AirconError::crypto(format!("blob is not base64: {e}")))?;
    let plaintext = CryptoCodec::from_material(auth_context).decrypt(&ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| AirconError::crypto("secret is not UTF-8"))
}
