//! Rules of an app.

use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt,
    entities::{App, Entity, Rule, RuleKind, RuleQuery},
};

use super::Core;

impl Core {
    /// Store a new rule. Rules start inactive unless flagged otherwise.
    pub async fn rule_create(&self, app: &App, mut rule: Rule) -> AppResult<Rule> {
        rule.id = 0;
        rule.deleted = false;
        rule.validate()?;
        self.stores().rules.put(&app.namespace(), rule).await
    }

    /// Logically delete a rule.
    pub async fn rule_delete(&self, app: &App, id: u64) -> AppResult<()> {
        let mut rule = self.rule_fetch(app, id).await?;
        rule.deleted = true;
        rule.active = false;
        self.stores().rules.put(&app.namespace(), rule).await?;
        Ok(())
    }

    /// Live rule by id.
    pub async fn rule_fetch(&self, app: &App, id: u64) -> AppResult<Rule> {
        self.stores()
            .rules
            .one(
                &app.namespace(),
                &RuleQuery {
                    deleted: Some(false),
                    ids: vec![id],
                    ..RuleQuery::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("rule {id} not found")))
    }

    /// Live rules of an app.
    pub async fn rule_list(&self, app: &App) -> AppResult<Vec<Rule>> {
        self.stores()
            .rules
            .query(
                &app.namespace(),
                &RuleQuery {
                    deleted: Some(false),
                    ..RuleQuery::default()
                },
            )
            .await
    }

    /// Activate a rule of the app.
    pub async fn rule_activate(&self, app: &App, id: u64) -> AppResult<Rule> {
        self.rule_set_active(app, id, true).await
    }

    /// Deactivate a rule of the app.
    pub async fn rule_deactivate(&self, app: &App, id: u64) -> AppResult<Rule> {
        self.rule_set_active(app, id, false).await
    }

    /// Active rules reacting to `kind`.
    pub async fn rules_active(&self, app: &App, kind: RuleKind) -> AppResult<Vec<Rule>> {
        self.stores()
            .rules
            .query(&app.namespace(), &RuleQuery::active_of(kind))
            .await
    }

    async fn rule_set_active(&self, app: &App, id: u64, active: bool) -> AppResult<Rule> {
        let mut rule = self.rule_fetch(app, id).await?;
        if rule.active == active {
            return Ok(rule);
        }
        rule.active = active;
        self.stores().rules.put(&app.namespace(), rule).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::testing::{app, core};
    use fanout_db::entities::{Criteria, CriteriaSet, Recipient};
    use maplit::hashmap;

    fn rule(active: bool) -> Rule {
        Rule {
            active,
            criteria: Criteria::Object(CriteriaSet::default()),
            name: "new post".to_string(),
            recipients: vec![Recipient {
                query: hashmap! { "ownerFriends".to_string() => String::new() },
                templates: hashmap! { "en".to_string() => "{{ .Owner.Username }} posted".to_string() },
                urn: "/posts/{{ .Object.ID }}".to_string(),
            }],
            ..Rule::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let core = core();
        let app = app();

        let r = core.rule_create(&app, rule(true)).await.unwrap();
        core.rule_create(&app, rule(false)).await.unwrap();
        assert_eq!(core.rule_list(&app).await.unwrap().len(), 2);
        assert_eq!(core.rules_active(&app, RuleKind::Object).await.unwrap().len(), 1);
        assert!(core.rules_active(&app, RuleKind::Event).await.unwrap().is_empty());

        core.rule_deactivate(&app, r.id).await.unwrap();
        assert!(core.rules_active(&app, RuleKind::Object).await.unwrap().is_empty());
        core.rule_activate(&app, r.id).await.unwrap();
        assert_eq!(core.rules_active(&app, RuleKind::Object).await.unwrap().len(), 1);

        core.rule_delete(&app, r.id).await.unwrap();
        assert_eq!(core.rule_list(&app).await.unwrap().len(), 1);
        let err = core.rule_fetch(&app, r.id).await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
    }
}
