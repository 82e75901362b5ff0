// MIT License - Copyright (c) 2026 Peter Wright
// Per-device credential records

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::DEFAULT_DEVICE_PORT;
use crate::crypto::decrypt_cached_secret;
use crate::error::{AirconError, Result};

/// Key material for one device, produced once by the discovery tool.
///
/// File format (extra fields such as `random_1`/`time_1` are ignored; they
/// are regenerated on every handshake):
///
/// ```json
/// {"lanip_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
///  "lanip_key_id": 8888,
///  "device_address": "192.168.1.40",
///  "device_id": "AC000W000000001"}
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, alias = "ip")]
    pub device_address: String,
    #[serde(default, alias = "dsn")]
    pub device_id: String,
    #[serde(rename = "lanip_key_id")]
    pub key_material_id: u32,
    #[serde(rename = "lanip_key")]
    pub shared_secret: String,
}

impl Credentials {
    pub fn new(
        device_address: impl Into<String>,
        device_id: impl Into<String>,
        key_material_id: u32,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            device_address: device_address.into(),
            device_id: device_id.into(),
            key_material_id,
            shared_secret: shared_secret.into(),
        }
    }

    /// Load a credential record from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let credentials: Credentials = serde_json::from_str(&text)?;
        if credentials.shared_secret.is_empty() {
            return Err(AirconError::Credentials {
                details: format!("{}: lanip_key is empty", path.display()),
            });
        }
        debug!(
            "Loaded credentials for {} (key id {}) from {}",
            credentials.device_id,
            credentials.key_material_id,
            path.display()
        );
        Ok(credentials)
    }

    /// Build credentials from the secret blob cached by the vendor app.
    pub fn from_cached_blob(
        device_address: impl Into<String>,
        device_id: impl Into<String>,
        key_material_id: u32,
        auth_context: &[u8],
        blob: &str,
    ) -> Result<Self> {
        let secret = decrypt_cached_secret(auth_context, blob)?;
        Ok(Self::new(device_address, device_id, key_material_id, secret))
    }

    /// Check that the record is complete enough to open a session.
    pub fn validate(&self) -> Result<()> {
        if self.device_address.trim().is_empty() {
            return Err(AirconError::Credentials {
                details: format!("no device address for {}", self.device_id),
            });
        }
        if self.shared_secret.is_empty() {
            return Err(AirconError::Credentials {
                details: format!("no shared secret for {}", self.device_id),
            });
        }
        Ok(())
    }

    /// `host:port`, with the default device port added when absent.
    pub fn socket_address(&self) -> String {
        let address = self.device_address.trim();
        if let Some(bracketed) = address.strip_prefix('[') {
            return match bracketed.split_once(']') {
                Some((_, "")) => format!("{}:{}", address, DEFAULT_DEVICE_PORT),
                _ => address.to_string(),
            };
        }
        // A bare IPv6 literal has no port of its own
        if address.matches(':').count() > 1 {
            return format!("[{}]:{}", address, DEFAULT_DEVICE_PORT);
        }
        let has_port = address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if has_port {
            address.to_string()
        } else {
            format!("{}:{}", address, DEFAULT_DEVICE_PORT)
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        self.shared_secret.as_bytes()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("device_address", &self.device_address)
            .field("device_id", &self.device_id)
            .field("key_material_id", &self.key_material_id)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}
