//! Push devices of users.

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, Device, DeviceQuery, Platform},
};
use tracing::warn;

use super::Core;

fn live_device(user_id: u64, device_id: &str) -> DeviceQuery {
    DeviceQuery {
        deleted: Some(false),
        device_ids: vec![device_id.to_string()],
        user_ids: vec![user_id],
        ..DeviceQuery::default()
    }
}

impl Core {
    /// Forget a device of the user. Missing devices are ignored.
    pub async fn device_delete(&self, app: &App, user_id: u64, device_id: &str) -> AppResult<()> {
        let ns = app.namespace();
        let devices = self
            .stores()
            .devices
            .query(&ns, &live_device(user_id, device_id))
            .await?;

        for mut device in devices {
            device.deleted = true;
            self.stores().devices.put(&ns, device).await?;
        }
        Ok(())
    }

    /// Register or refresh the push token of a device.
    ///
    /// A device the push backend reports as disabled is stored as such and
    /// the call still succeeds.
    pub async fn device_update(
        &self,
        app: &App,
        user_id: u64,
        device_id: &str,
        platform: Platform,
        token: &str,
        language: &str,
    ) -> AppResult<()> {
        let ns = app.namespace();
        let existing = self
            .stores()
            .devices
            .one(&ns, &live_device(user_id, device_id))
            .await?;

        let device = match existing {
            Some(d) if d.token == token => return Ok(()),
            Some(mut d) => {
                d.disabled = false;
                d.token = token.to_string();
                d
            }
            None => Device {
                device_id: device_id.to_string(),
                language: language.to_string(),
                platform,
                token: token.to_string(),
                user_id,
                ..Device::default()
            },
        };

        match self.stores().devices.put(&ns, device.clone()).await {
            Ok(_) => Ok(()),
            Err(AppError::DeviceDisabled(reason)) => {
                warn!(user_id, device_id, %reason, "device disabled by push backend");
                self.device_disable(app, device).await
            }
            Err(e) => Err(e),
        }
    }

    async fn device_disable(&self, app: &App, mut device: Device) -> AppResult<()> {
        device.disabled = true;
        match self.stores().devices.put(&app.namespace(), device).await {
            Ok(_) | Err(AppError::DeviceDisabled(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fanout_common::IdGenerator;
    use fanout_db::store::MemoryStore;

    use super::*;
    use crate::services::{Stores, testing::app};

    /// Rejects every enabled device with a given token.
    struct RejectingStore {
        inner: MemoryStore<Device>,
        token: &'static str,
    }

    #[async_trait]
    impl Service<Device> for RejectingStore {
        async fn put(&self, ns: &str, device: Device) -> AppResult<Device> {
            if !device.disabled && device.token == self.token {
                return Err(AppError::DeviceDisabled("endpoint disabled".to_string()));
            }
            self.inner.put(ns, device).await
        }

        async fn query(&self, ns: &str, opts: &DeviceQuery) -> AppResult<Vec<Device>> {
            self.inner.query(ns, opts).await
        }

        async fn count(&self, ns: &str, opts: &DeviceQuery) -> AppResult<u64> {
            self.inner.count(ns, opts).await
        }

        async fn setup(&self, ns: &str) -> AppResult<()> {
            self.inner.setup(ns).await
        }

        async fn teardown(&self, ns: &str) -> AppResult<()> {
            self.inner.teardown(ns).await
        }
    }

    fn core_with(token: &'static str) -> Core {
        let ids = IdGenerator::new();
        let mut stores = Stores::memory(&ids);
        stores.devices = Arc::new(RejectingStore {
            inner: MemoryStore::new(ids.clone()),
            token,
        });
        Core::new(stores, ids)
    }

    async fn devices(core: &Core, app: &App) -> Vec<Device> {
        core.stores()
            .devices
            .query(&app.namespace(), &DeviceQuery::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_update_creates_and_refreshes() {
        let core = core_with("never");
        let app = app();

        core.device_update(&app, 1, "d1", Platform::Android, "tok-a", "en").await.unwrap();
        core.device_update(&app, 1, "d1", Platform::Android, "tok-a", "en").await.unwrap();
        assert_eq!(devices(&core, &app).await.len(), 1);

        core.device_update(&app, 1, "d1", Platform::Android, "tok-b", "en").await.unwrap();
        let all = devices(&core, &app).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].token, "tok-b");
        assert!(!all[0].disabled);
    }

    #[tokio::test]
    async fn test_disabled_device_is_stored_disabled() {
        let core = core_with("bad");
        let app = app();

        core.device_update(&app, 1, "d1", Platform::Ios, "bad", "en").await.unwrap();
        let all = devices(&core, &app).await;
        assert_eq!(all.len(), 1);
        assert!(all[0].disabled);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let core = core_with("never");
        let app = app();

        core.device_update(&app, 1, "d1", Platform::Ios, "tok", "en").await.unwrap();
        core.device_delete(&app, 1, "d1").await.unwrap();
        core.device_delete(&app, 1, "d1").await.unwrap();

        let live = core
            .stores()
            .devices
            .query(&app.namespace(), &live_device(1, "d1"))
            .await
            .unwrap();
        assert!(live.is_empty());
    }
}
