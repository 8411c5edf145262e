//! Caller identity.

use fanout_common::{AppError, AppResult};

/// Device id assumed when a request carries none.
pub const DEFAULT_DEVICE_ID: &str = "tg_default_device";

/// Class of caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Integration {
    /// End-user client, authenticated with the 32 char app token.
    #[default]
    Application,
    /// Server-to-server caller, authenticated with the 44 char backend token.
    Backend,
}

/// The caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Kind of credentials the caller presented.
    pub integration: Integration,
    /// User the caller acts as; 0 for app-only calls.
    pub user_id: u64,
    /// Device id from the request headers.
    pub device_id: String,
}

impl Default for Origin {
    fn default() -> Self {
        Self {
            integration: Integration::Application,
            user_id: 0,
            device_id: DEFAULT_DEVICE_ID.to_string(),
        }
    }
}

impl Origin {
    /// Application caller acting as `user_id`.
    #[must_use]
    pub fn application(user_id: u64) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    /// Backend caller acting as `user_id`.
    #[must_use]
    pub fn backend(user_id: u64) -> Self {
        Self {
            integration: Integration::Backend,
            user_id,
            ..Self::default()
        }
    }

    /// Same caller on another device.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Whether the caller holds the backend token.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        self.integration == Integration::Backend
    }

    /// Fails with `Unauthorized` unless the caller is a backend.
    pub fn require_backend(&self, what: &str) -> AppResult<()> {
        if self.is_backend() {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "{what} can only be set by backend integrations"
            )))
        }
    }
}
