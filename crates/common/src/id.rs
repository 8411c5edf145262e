//! ID generation utilities.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE},
};
use rand::RngCore;
use uuid::Uuid;

use crate::{AppError, AppResult};

/// 2016-01-01T00:00:00Z in milliseconds.
const EPOCH_MS: u64 = 1_451_606_400_000;

/// Bits reserved below the timestamp for same-millisecond sequencing.
const SEQUENCE_BITS: u32 = 12;

/// Length of application tokens (hex encoded md5).
pub const APP_TOKEN_LEN: usize = 32;

/// Length of backend tokens (base64 of 32 random bytes).
pub const BACKEND_TOKEN_LEN: usize = 44;

/// Namespace-keyed monotonic id source.
///
/// Ids are time-ordered: the millisecond offset from a fixed epoch shifted
/// left by [`SEQUENCE_BITS`]. When the clock has not advanced past the last
/// id handed out for a key, the next id is `last + 1`. Handed around as a
/// dependency; clones share state.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    last: Arc<Mutex<HashMap<String, u64>>>,
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for `key`, conventionally `<namespace>_<entity>`.
    pub fn next(&self, key: &str) -> AppResult<u64> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(e.to_string()))?
            .as_millis() as u64;
        let candidate = now.saturating_sub(EPOCH_MS) << SEQUENCE_BITS;

        let mut last = self
            .last
            .lock()
            .map_err(|e| AppError::Internal(format!("id generator poisoned: {e}")))?;
        let entry = last.entry(key.to_string()).or_insert(0);
        let id = candidate.max(*entry + 1);
        *entry = id;

        Ok(id)
    }

    /// Opaque session token.
    #[must_use]
    pub fn session_token(&self) -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE.encode(bytes)
    }

    /// Public opaque id of an app.
    #[must_use]
    pub fn public_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Application token: 32 hex chars.
    #[must_use]
    pub fn app_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{:x}", md5::compute(bytes))
    }

    /// Backend token: 44 base64 chars.
    #[must_use]
    pub fn backend_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }
}
