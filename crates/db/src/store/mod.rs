//! Concrete entity stores.

pub mod memory;
pub mod nop;
pub mod postgres;

pub use memory::MemoryStore;
pub use nop::NopStore;
pub use postgres::PostgresStore;

use chrono::{DateTime, Duration, Utc};
use fanout_common::{AppError, AppResult};

use crate::entities::{Entity, now};

/// Namespaces become schema names, so only a conservative alphabet passes.
pub(crate) fn check_namespace(ns: &str) -> AppResult<()> {
    let valid = !ns.is_empty()
        && ns
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid namespace '{ns}'")))
    }
}

/// Key of the id sequence of `E` in `ns`.
pub(crate) fn id_key<E: Entity>(ns: &str) -> String {
    format!("{ns}_{}", E::TABLE)
}

/// Assign server-side timestamps for a write of `entity` over `existing`.
///
/// Updates keep `created_at` and move `updated_at` strictly forward. Inserts
/// keep a caller supplied `created_at`.
pub(crate) fn stamp<E: Entity>(entity: &mut E, existing: Option<&E>) {
    let now = now();
    match existing {
        Some(old) => {
            let floor = old.updated_at() + Duration::microseconds(1);
            entity.set_timestamps(old.created_at(), now.max(floor));
        }
        None => {
            let created = if entity.created_at() == DateTime::<Utc>::default() {
                now
            } else {
                entity.created_at()
            };
            entity.set_timestamps(created, now.max(created));
        }
    }
}
