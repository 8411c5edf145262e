//! Apps: tenants and their credentials.

use fanout_common::{
    AppError, AppResult,
    id::{APP_TOKEN_LEN, BACKEND_TOKEN_LEN},
};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, AppQuery, app::APPS_NAMESPACE},
};
use tracing::info;

use super::Core;
use crate::origin::Integration;

fn enabled(query: AppQuery) -> AppQuery {
    AppQuery {
        enabled: Some(true),
        ..query
    }
}

/// Split `app_{org}_{id}` into its ids.
pub fn parse_namespace(ns: &str) -> Option<(u64, u64)> {
    let rest = ns.strip_prefix("app_")?;
    let (org, id) = rest.split_once('_')?;
    Some((org.parse().ok()?, id.parse().ok()?))
}

impl Core {
    /// Create an app with fresh credentials and prepare its namespace.
    pub async fn app_create(
        &self,
        org_id: u64,
        name: &str,
        description: &str,
    ) -> AppResult<App> {
        let ids = self.ids();
        let app = App {
            backend_token: ids.backend_token(),
            description: description.to_string(),
            enabled: true,
            in_production: false,
            name: name.to_string(),
            org_id,
            public_id: ids.public_id(),
            token: ids.app_token(),
            ..App::default()
        };

        let app = self.stores().apps.put(APPS_NAMESPACE, app).await?;
        self.namespace_setup(&app.namespace()).await?;
        info!(app_id = app.id, org_id, "app created");
        Ok(app)
    }

    /// Disable an app. Its data stays in place.
    pub async fn app_delete(&self, id: u64) -> AppResult<()> {
        let mut app = self.app_fetch(id).await?;
        app.enabled = false;
        self.stores().apps.put(APPS_NAMESPACE, app).await?;
        Ok(())
    }

    /// Enabled app by id.
    pub async fn app_fetch(&self, id: u64) -> AppResult<App> {
        self.stores()
            .apps
            .one(
                APPS_NAMESPACE,
                &enabled(AppQuery {
                    ids: vec![id],
                    ..AppQuery::default()
                }),
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("app {id} not found")))
    }

    /// Enabled apps of an organisation.
    pub async fn app_list(&self, org_id: u64) -> AppResult<Vec<App>> {
        self.stores()
            .apps
            .query(
                APPS_NAMESPACE,
                &enabled(AppQuery {
                    org_ids: vec![org_id],
                    ..AppQuery::default()
                }),
            )
            .await
    }

    /// Change the descriptive fields of an app.
    pub async fn app_update(&self, id: u64, name: &str, description: &str, url: &str) -> AppResult<App> {
        let mut app = self.app_fetch(id).await?;
        app.name = name.to_string();
        app.description = description.to_string();
        app.url = url.to_string();
        self.stores().apps.put(APPS_NAMESPACE, app).await
    }

    /// Resolve the calling app from either of its tokens.
    pub async fn app_by_token(&self, token: &str) -> AppResult<(App, Integration)> {
        let (query, integration) = match token.len() {
            APP_TOKEN_LEN => (
                AppQuery {
                    tokens: vec![token.to_string()],
                    ..AppQuery::default()
                },
                Integration::Application,
            ),
            BACKEND_TOKEN_LEN => (
                AppQuery {
                    backend_tokens: vec![token.to_string()],
                    ..AppQuery::default()
                },
                Integration::Backend,
            ),
            _ => return Err(AppError::Unauthorized("invalid token".to_string())),
        };

        let app = self
            .stores()
            .apps
            .one(APPS_NAMESPACE, &enabled(query))
            .await?
            .ok_or_else(|| AppError::Unauthorized("application not found".to_string()))?;
        Ok((app, integration))
    }

    /// Resolve the app owning `ns`.
    pub async fn app_by_namespace(&self, ns: &str) -> AppResult<App> {
        let (org_id, id) = parse_namespace(ns)
            .ok_or_else(|| AppError::BadRequest(format!("invalid namespace '{ns}'")))?;
        let app = self.app_fetch(id).await?;
        if app.org_id != org_id {
            return Err(AppError::NotFound(format!("app for '{ns}' not found")));
        }
        Ok(app)
    }

    async fn namespace_setup(&self, ns: &str) -> AppResult<()> {
        let s = self.stores();
        s.connections.setup(ns).await?;
        s.devices.setup(ns).await?;
        s.events.setup(ns).await?;
        s.objects.setup(ns).await?;
        s.reactions.setup(ns).await?;
        s.rules.setup(ns).await?;
        s.sessions.setup(ns).await?;
        s.users.setup(ns).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::testing::core;

    #[test]
    fn test_parse_namespace() {
        assert_eq!(parse_namespace("app_3_12"), Some((3, 12)));
        assert_eq!(parse_namespace("tg"), None);
        assert_eq!(parse_namespace("app_x_1"), None);
    }

    #[tokio::test]
    async fn test_create_mints_credentials() {
        let core = core();
        let app = core.app_create(7, "demo", "a demo app").await.unwrap();
        assert_eq!(app.token.len(), APP_TOKEN_LEN);
        assert_eq!(app.backend_token.len(), BACKEND_TOKEN_LEN);
        assert!(!app.public_id.is_empty());
        assert!(app.enabled);
        assert!(!app.in_production);

        let listed = core.app_list(7).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(core.app_list(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_by_token() {
        let core = core();
        let app = core.app_create(1, "demo", "").await.unwrap();

        let (found, integration) = core.app_by_token(&app.token).await.unwrap();
        assert_eq!(found.id, app.id);
        assert_eq!(integration, Integration::Application);

        let (found, integration) = core.app_by_token(&app.backend_token).await.unwrap();
        assert_eq!(found.id, app.id);
        assert_eq!(integration, Integration::Backend);

        let err = core.app_by_token("short").await;
        assert!(matches!(err, Err(AppError::Unauthorized(_))));

        core.app_delete(app.id).await.unwrap();
        let err = core.app_by_token(&app.token).await;
        assert!(matches!(err, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_update_and_namespace_lookup() {
        let core = core();
        let app = core.app_create(4, "demo", "").await.unwrap();
        let updated = core
            .app_update(app.id, "renamed", "new", "https://example.com")
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.token, app.token);

        let found = core.app_by_namespace(&app.namespace()).await.unwrap();
        assert_eq!(found.id, app.id);
        assert!(core.app_by_namespace(&format!("app_5_{}", app.id)).await.is_err());
    }
}
