//! Password hashing.
//!
//! Stored form: `base64( base64(salt) ":" base64(timestamp) ":" base64(key) )`
//! where `key = scrypt(password, salt ":" timestamp)`.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use scrypt::{Params, scrypt};

use crate::{AppError, AppResult};

const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;
const LOG_N: u8 = 14;
const R: u32 = 8;
const P: u32 = 1;

fn derive(password: &[u8], salt: &[u8], ts: &[u8]) -> AppResult<Vec<u8>> {
    let params = Params::new(LOG_N, R, P, KEY_LEN)
        .map_err(|e| AppError::Internal(format!("scrypt params: {e}")))?;

    let mut esalt = Vec::with_capacity(salt.len() + 1 + ts.len());
    esalt.extend_from_slice(salt);
    esalt.push(b':');
    esalt.extend_from_slice(ts);

    let mut key = vec![0u8; KEY_LEN];
    scrypt(password, &esalt, &params, &mut key)
        .map_err(|e| AppError::Internal(format!("scrypt: {e}")))?;
    Ok(key)
}

/// Hash `password` for storage.
pub fn password_secure(password: &str) -> AppResult<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let ts = chrono::Utc::now().to_rfc3339();

    let key = derive(password.as_bytes(), &salt, ts.as_bytes())?;
    let inner = format!(
        "{}:{}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(ts.as_bytes()),
        STANDARD.encode(key)
    );

    Ok(STANDARD.encode(inner))
}

/// Check `password` against a stored hash.
///
/// Malformed encodings and mismatches both yield `Unauthorized`.
pub fn password_compare(password: &str, encoded: &str) -> AppResult<()> {
    let wrong = || AppError::Unauthorized("wrong credentials".to_string());

    let decoded = STANDARD.decode(encoded).map_err(|_| wrong())?;
    let decoded = String::from_utf8(decoded).map_err(|_| wrong())?;

    let mut parts = decoded.splitn(3, ':');
    let (Some(salt), Some(ts), Some(key)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(wrong());
    };

    let salt = STANDARD.decode(salt).map_err(|_| wrong())?;
    let ts = STANDARD.decode(ts).map_err(|_| wrong())?;
    let key = STANDARD.decode(key).map_err(|_| wrong())?;

    if derive(password.as_bytes(), &salt, &ts)? == key {
        Ok(())
    } else {
        Err(wrong())
    }
}
