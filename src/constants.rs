// MIT License - Copyright (c) 2026 Peter Wright
// LAN protocol constants

/// Frame terminator for every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'\n';
/// Largest frame accepted from a device, terminator excluded.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Key exchange version and protocol numbers the gateway understands.
pub const KEY_EXCHANGE_VERSION: u32 = 1;
pub const KEY_EXCHANGE_PROTO: u32 = 1;

/// Length of the random nonce each side contributes to the key exchange.
pub const NONCE_LEN: usize = 16;
/// The gateway's `time_2` is the wall-clock time in nanoseconds reduced modulo 2^40.
pub const NONCE_TIME_MODULUS: u128 = 1 << 40;

/// Salt appended to the authentication context before hashing the IV.
pub const IV_SALT: &[u8] = b"2";
/// Salt appended to the authentication context before hashing the signing key.
pub const SIGN_SALT: &[u8] = b"0";

/// AES block size in bytes (IV length).
pub const BLOCK_SIZE: usize = 16;
/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// TCP port used when the device address carries none.
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// Broadcast channel capacity for per-device events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
