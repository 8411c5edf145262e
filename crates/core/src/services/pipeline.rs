//! Rule pipelines: state changes in, addressed and rendered messages out.
//!
//! Each entity kind gets a context of explicitly exposed fields. Rules whose
//! criteria accept the change expand their recipient queries into users and
//! render the URN and per-language templates against the context.

use std::collections::HashMap;

use chrono::Utc;
use fanout_common::{AppError, AppResult};
use fanout_db::{
    Service, ServiceExt, StateChange,
    entities::{
        App, Connection, ConnectionState, ConnectionType, Criteria, Event, Object, ObjectQuery,
        Reaction, ReactionType, Recipient, Rule, User, Visibility,
    },
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Core, template::Template};

const COND_OBJECT_OWNER: &str = "objectOwner";
const COND_OWNER: &str = "owner";
const COND_OWNER_FRIENDS: &str = "ownerFriends";
const COND_PARENT_OWNER: &str = "parentOwner";
const COND_USER_FROM: &str = "userFrom";
const COND_USER_TO: &str = "userTo";

/// A rendered notification for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Rendered text keyed by language.
    pub messages: HashMap<String, String>,
    /// User the message is for.
    pub recipient: u64,
    /// Resource the message points at, rendered from the rule.
    pub urn: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct UserView<'a> {
    #[serde(rename = "ID")]
    id: u64,
    about: &'a str,
    #[serde(rename = "CustomID")]
    custom_id: &'a str,
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    metadata: &'a HashMap<String, String>,
    #[serde(rename = "URL")]
    url: &'a str,
    username: &'a str,
}

impl<'a> From<&'a User> for UserView<'a> {
    fn from(u: &'a User) -> Self {
        Self {
            id: u.id,
            about: &u.about,
            custom_id: &u.custom_id,
            email: &u.email,
            first_name: &u.first_name,
            last_name: &u.last_name,
            metadata: &u.metadata,
            url: &u.url,
            username: &u.username,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectView<'a> {
    #[serde(rename = "ID")]
    id: u64,
    #[serde(rename = "ExternalID")]
    external_id: &'a str,
    #[serde(rename = "ObjectID")]
    object_id: u64,
    owned: bool,
    #[serde(rename = "OwnerID")]
    owner_id: u64,
    tags: &'a [String],
    #[serde(rename = "Type")]
    kind: &'a str,
    visibility: Visibility,
}

impl<'a> From<&'a Object> for ObjectView<'a> {
    fn from(o: &'a Object) -> Self {
        Self {
            id: o.id,
            external_id: &o.external_id,
            object_id: o.object_id,
            owned: o.owned,
            owner_id: o.owner_id,
            tags: &o.tags,
            kind: &o.kind,
            visibility: o.visibility,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectionView {
    enabled: bool,
    #[serde(rename = "FromID")]
    from_id: u64,
    state: ConnectionState,
    #[serde(rename = "ToID")]
    to_id: u64,
    #[serde(rename = "Type")]
    kind: ConnectionType,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EventView<'a> {
    #[serde(rename = "ID")]
    id: u64,
    language: &'a str,
    metadata: &'a HashMap<String, String>,
    #[serde(rename = "ObjectID")]
    object_id: u64,
    owned: bool,
    #[serde(rename = "TargetID")]
    target_id: Option<&'a str>,
    target_type: Option<&'a str>,
    #[serde(rename = "Type")]
    kind: &'a str,
    #[serde(rename = "UserID")]
    user_id: u64,
    visibility: Visibility,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReactionView {
    #[serde(rename = "ID")]
    id: u64,
    deleted: bool,
    #[serde(rename = "ObjectID")]
    object_id: u64,
    #[serde(rename = "OwnerID")]
    owner_id: u64,
    #[serde(rename = "Type")]
    kind: ReactionType,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectionContext<'a> {
    connection: ConnectionView,
    from: UserView<'a>,
    to: UserView<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EventContext<'a> {
    event: EventView<'a>,
    owner: UserView<'a>,
    parent: Option<ObjectView<'a>>,
    parent_owner: Option<UserView<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectContext<'a> {
    attachments: HashMap<&'a str, &'a HashMap<String, String>>,
    object: ObjectView<'a>,
    owner: UserView<'a>,
    parent: Option<ObjectView<'a>>,
    parent_owner: Option<UserView<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReactionContext<'a> {
    owner: UserView<'a>,
    parent: Option<ObjectView<'a>>,
    parent_owner: Option<UserView<'a>>,
    reaction: ReactionView,
}

/// Owner of a change and, for children, the parent object and its owner.
struct Parties {
    owner: User,
    parent: Option<Object>,
    parent_owner: Option<User>,
}

impl Parties {
    /// Parent owner, unless the owner acts on their own object.
    fn foreign_parent_owner(&self) -> Option<&User> {
        self.parent_owner
            .as_ref()
            .filter(|p| p.id != self.owner.id)
    }

    fn parent_owner_id(&self) -> Option<u64> {
        self.parent_owner.as_ref().map(|p| p.id)
    }
}

fn to_value<C: Serialize>(ctx: &C) -> AppResult<Value> {
    serde_json::to_value(ctx).map_err(|e| AppError::Template(format!("context: {e}")))
}

/// Query conditions of a recipient in a stable order.
fn conditions(recipient: &Recipient) -> Vec<(&str, &str)> {
    let mut conds: Vec<(&str, &str)> = recipient
        .query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    conds.sort_unstable();
    conds
}

/// Recipients of rules whose criteria accept the change.
fn matching<'r>(
    rules: &'r [Rule],
    accepts: impl Fn(&Criteria) -> bool + 'r,
) -> impl Iterator<Item = &'r Recipient> + 'r {
    rules
        .iter()
        .filter(move |r| accepts(&r.criteria))
        .flat_map(|r| r.recipients.iter())
}

fn compile(ctx: &Value, recipient: &Recipient, targets: &[u64]) -> AppResult<Vec<Message>> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    let urn = Template::parse(&recipient.urn)?.render_value(ctx)?;
    let mut messages = HashMap::with_capacity(recipient.templates.len());
    for (lang, source) in &recipient.templates {
        messages.insert(lang.clone(), Template::parse(source)?.render_value(ctx)?);
    }

    Ok(targets
        .iter()
        .map(|&recipient| Message {
            messages: messages.clone(),
            recipient,
            urn: urn.clone(),
        })
        .collect())
}

impl Core {
    /// Messages for a connection change. Only changes with a post-image
    /// produce messages.
    pub async fn pipeline_connection(
        &self,
        app: &App,
        change: &StateChange<Connection>,
        rules: &[Rule],
    ) -> AppResult<Vec<Message>> {
        let Some(con) = change.new.as_ref() else {
            return Ok(Vec::new());
        };

        let from = self.user_fetch(app, con.from_id).await?;
        let to = self.user_fetch(app, con.to_id).await?;
        let ctx = to_value(&ConnectionContext {
            connection: ConnectionView {
                enabled: con.enabled,
                from_id: con.from_id,
                state: con.state,
                to_id: con.to_id,
                kind: con.kind,
            },
            from: (&from).into(),
            to: (&to).into(),
        })?;

        let accepts = |c: &Criteria| match c {
            Criteria::Connection(set) => set.accepts(change.old.as_ref(), change.new.as_ref()),
            _ => false,
        };

        let mut out = Vec::new();
        for recipient in matching(rules, accepts) {
            let mut targets = Vec::new();
            for (cond, _) in conditions(recipient) {
                match cond {
                    COND_USER_FROM => targets.push(from.id),
                    COND_USER_TO => targets.push(to.id),
                    _ => {}
                }
            }
            out.extend(compile(&ctx, recipient, &targets)?);
        }

        debug!(namespace = %change.namespace, messages = out.len(), "connection pipeline");
        Ok(out)
    }

    /// Messages for an event change.
    pub async fn pipeline_event(
        &self,
        app: &App,
        change: &StateChange<Event>,
        rules: &[Rule],
    ) -> AppResult<Vec<Message>> {
        let Some(event) = change.new.as_ref() else {
            return Ok(Vec::new());
        };

        let parties = self.parties(app, event.user_id, event.object_id).await?;
        let ctx = to_value(&EventContext {
            event: EventView {
                id: event.id,
                language: &event.language,
                metadata: &event.metadata,
                object_id: event.object_id,
                owned: event.owned,
                target_id: event.target.as_ref().map(|t| t.id.as_str()),
                target_type: event.target.as_ref().map(|t| t.kind.as_str()),
                kind: &event.kind,
                user_id: event.user_id,
                visibility: event.visibility,
            },
            owner: (&parties.owner).into(),
            parent: parties.parent.as_ref().map(Into::into),
            parent_owner: parties.parent_owner.as_ref().map(Into::into),
        })?;

        let accepts = |c: &Criteria| match c {
            Criteria::Event(set) => set.accepts(change.old.as_ref(), change.new.as_ref()),
            _ => false,
        };

        let mut out = Vec::new();
        for recipient in matching(rules, accepts) {
            let targets = owner_conditions(recipient, &parties);
            out.extend(compile(&ctx, recipient, &targets)?);
        }

        debug!(namespace = %change.namespace, messages = out.len(), "event pipeline");
        Ok(out)
    }

    /// Messages for an object change. Only changes with a post-image
    /// produce messages.
    pub async fn pipeline_object(
        &self,
        app: &App,
        change: &StateChange<Object>,
        rules: &[Rule],
    ) -> AppResult<Vec<Message>> {
        let Some(object) = change.new.as_ref() else {
            return Ok(Vec::new());
        };

        let parties = self
            .parties(app, object.owner_id, object.object_id)
            .await?;
        let ctx = to_value(&ObjectContext {
            attachments: object
                .attachments
                .iter()
                .map(|a| (a.name.as_str(), &a.contents))
                .collect(),
            object: object.into(),
            owner: (&parties.owner).into(),
            parent: parties.parent.as_ref().map(Into::into),
            parent_owner: parties.parent_owner.as_ref().map(Into::into),
        })?;

        let accepts = |c: &Criteria| match c {
            Criteria::Object(set) => set.accepts(change.old.as_ref(), change.new.as_ref()),
            _ => false,
        };

        let mut out = Vec::new();
        for recipient in matching(rules, accepts) {
            let mut ids = Vec::new();
            for (cond, source) in conditions(recipient) {
                match cond {
                    COND_OBJECT_OWNER => {
                        let owners = self.object_owner_ids(app, &ctx, source).await?;
                        ids.extend(owners.into_iter().filter(|id| {
                            *id != parties.owner.id && Some(*id) != parties.parent_owner_id()
                        }));
                    }
                    COND_OWNER_FRIENDS => {
                        ids.extend(self.connection_friend_ids(app, parties.owner.id).await?);
                    }
                    COND_OWNER => ids.push(parties.owner.id),
                    COND_PARENT_OWNER => {
                        ids.extend(parties.foreign_parent_owner().map(|u| u.id));
                    }
                    _ => {}
                }
            }

            let targets: Vec<u64> = self
                .users_fetch(app, &ids)
                .await?
                .iter()
                .map(|u| u.id)
                .collect();
            out.extend(compile(&ctx, recipient, &targets)?);
        }

        debug!(namespace = %change.namespace, messages = out.len(), "object pipeline");
        Ok(out)
    }

    /// Messages for a reaction change.
    pub async fn pipeline_reaction(
        &self,
        app: &App,
        change: &StateChange<Reaction>,
        rules: &[Rule],
    ) -> AppResult<Vec<Message>> {
        let Some(reaction) = change.new.as_ref() else {
            return Ok(Vec::new());
        };

        let parties = self
            .parties(app, reaction.owner_id, reaction.object_id)
            .await?;
        let ctx = to_value(&ReactionContext {
            owner: (&parties.owner).into(),
            parent: parties.parent.as_ref().map(Into::into),
            parent_owner: parties.parent_owner.as_ref().map(Into::into),
            reaction: ReactionView {
                id: reaction.id,
                deleted: reaction.deleted,
                object_id: reaction.object_id,
                owner_id: reaction.owner_id,
                kind: reaction.kind,
            },
        })?;

        let accepts = |c: &Criteria| match c {
            Criteria::Reaction(set) => set.accepts(change.old.as_ref(), change.new.as_ref()),
            _ => false,
        };

        let mut out = Vec::new();
        for recipient in matching(rules, accepts) {
            let targets = owner_conditions(recipient, &parties);
            out.extend(compile(&ctx, recipient, &targets)?);
        }

        debug!(namespace = %change.namespace, messages = out.len(), "reaction pipeline");
        Ok(out)
    }

    async fn parties(&self, app: &App, owner_id: u64, object_id: u64) -> AppResult<Parties> {
        let owner = self.user_fetch(app, owner_id).await?;
        if object_id == 0 {
            return Ok(Parties {
                owner,
                parent: None,
                parent_owner: None,
            });
        }

        let parent = self.object_fetch_any(app, object_id).await?;
        let parent_owner = self.user_fetch(app, parent.owner_id).await?;
        Ok(Parties {
            owner,
            parent: Some(parent),
            parent_owner: Some(parent_owner),
        })
    }

    /// Object by id, deleted or not.
    async fn object_fetch_any(&self, app: &App, id: u64) -> AppResult<Object> {
        self.stores()
            .objects
            .one(
                &app.namespace(),
                &ObjectQuery {
                    deleted: None,
                    ids: vec![id],
                    ..ObjectQuery::default()
                },
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("object missing for '{id}'")))
    }

    /// Owners of the objects selected by a rendered query document.
    async fn object_owner_ids(&self, app: &App, ctx: &Value, source: &str) -> AppResult<Vec<u64>> {
        let doc = Template::parse(source)?.render_value(ctx)?;
        let mut opts: ObjectQuery = serde_json::from_str(&doc)
            .map_err(|e| AppError::Template(format!("object query '{doc}': {e}")))?;
        opts.before = Some(Utc::now());

        let objects = self.stores().objects.query(&app.namespace(), &opts).await?;
        let mut ids: Vec<u64> = objects.iter().map(|o| o.owner_id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

/// `owner` and `parentOwner` conditions shared by events and reactions.
fn owner_conditions(recipient: &Recipient, parties: &Parties) -> Vec<u64> {
    let mut targets = Vec::new();
    for (cond, _) in conditions(recipient) {
        match cond {
            COND_OWNER => targets.push(parties.owner.id),
            COND_PARENT_OWNER => targets.extend(parties.foreign_parent_owner().map(|u| u.id)),
            _ => {}
        }
    }
    targets
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::origin::Origin;
    use crate::services::testing::{app, connect, core, post_input, user};
    use fanout_db::entities::{ConnectionQuery, CriteriaSet, object::TYPE_COMMENT};
    use maplit::hashmap;

    fn change<E>(old: Option<E>, new: Option<E>) -> StateChange<E> {
        StateChange {
            ack_id: "ack".to_string(),
            namespace: app().namespace(),
            new,
            old,
            sent_at: Utc::now(),
        }
    }

    fn rule(criteria: Criteria, query: HashMap<String, String>, template: &str, urn: &str) -> Rule {
        Rule {
            active: true,
            criteria,
            name: "test".to_string(),
            recipients: vec![Recipient {
                query,
                templates: hashmap! { "en".to_string() => template.to_string() },
                urn: urn.to_string(),
            }],
            ..Rule::default()
        }
    }

    #[tokio::test]
    async fn test_connection_follow() {
        let core = core();
        let app = app();
        let alice = user(&core, &app, "alice").await;
        let bob = user(&core, &app, "bob").await;
        let con = connect(&core, &app, alice.id, bob.id, ConnectionType::Follow).await;

        let follows = Criteria::Connection(CriteriaSet {
            new: Some(ConnectionQuery {
                types: vec![ConnectionType::Follow],
                states: vec![ConnectionState::Confirmed],
                ..ConnectionQuery::default()
            }),
            old: None,
        });
        let rules = vec![
            rule(
                follows,
                hashmap! { COND_USER_TO.to_string() => String::new() },
                "{{ .From.Username }} started following you",
                "users/{{ .From.ID }}",
            ),
            rule(
                Criteria::Object(CriteriaSet::default()),
                hashmap! { COND_OWNER.to_string() => String::new() },
                "never",
                "never",
            ),
        ];

        let msgs = core
            .pipeline_connection(&app, &change(None, Some(con.clone())), &rules)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].recipient, bob.id);
        assert_eq!(msgs[0].urn, format!("users/{}", alice.id));
        assert_eq!(msgs[0].messages["en"], "alice started following you");

        let gone = core
            .pipeline_connection(&app, &change(Some(con), None), &rules)
            .await
            .unwrap();
        assert!(gone.is_empty());
    }

    #[tokio::test]
    async fn test_object_owner_friends() {
        let core = core();
        let app = app();
        let alice = user(&core, &app, "alice").await;
        let bob = user(&core, &app, "bob").await;
        let carol = user(&core, &app, "carol").await;
        connect(&core, &app, alice.id, bob.id, ConnectionType::Friend).await;
        connect(&core, &app, carol.id, alice.id, ConnectionType::Friend).await;

        let post = core
            .post_create(&app, &Origin::application(alice.id), post_input(Visibility::Public))
            .await
            .unwrap()
            .object;

        let rules = vec![rule(
            Criteria::Object(CriteriaSet {
                new: Some(ObjectQuery {
                    owned: Some(true),
                    ..ObjectQuery::default()
                }),
                old: None,
            }),
            hashmap! { COND_OWNER_FRIENDS.to_string() => String::new() },
            "{{ .Owner.Username }}: {{ .Attachments.body.en }}",
            "posts/{{ .Object.ID }}",
        )];

        let mut msgs = core
            .pipeline_object(&app, &change(None, Some(post.clone())), &rules)
            .await
            .unwrap();
        msgs.sort_by_key(|m| m.recipient);
        let recipients: Vec<u64> = msgs.iter().map(|m| m.recipient).collect();
        assert_eq!(recipients, {
            let mut r = vec![bob.id, carol.id];
            r.sort_unstable();
            r
        });
        assert_eq!(msgs[0].messages["en"], "alice: hello");
        assert_eq!(msgs[0].urn, format!("posts/{}", post.id));
    }

    #[tokio::test]
    async fn test_object_comment_notifies_commenters_and_parent_owner() {
        let core = core();
        let app = app();
        let alice = user(&core, &app, "alice").await;
        let bob = user(&core, &app, "bob").await;
        let carol = user(&core, &app, "carol").await;

        let post = core
            .post_create(&app, &Origin::application(alice.id), post_input(Visibility::Public))
            .await
            .unwrap()
            .object;
        let comment = |owner: u64| Object {
            object_id: post.id,
            owned: true,
            owner_id: owner,
            kind: TYPE_COMMENT.to_string(),
            visibility: Visibility::Public,
            ..post_input(Visibility::Public)
        };
        let ns = app.namespace();
        core.stores().objects.put(&ns, comment(bob.id)).await.unwrap();
        let latest = core.stores().objects.put(&ns, comment(carol.id)).await.unwrap();

        let rules = vec![rule(
            Criteria::Object(CriteriaSet::default()),
            hashmap! {
                COND_OBJECT_OWNER.to_string() =>
                    r#"{"object_ids":[{{ .Parent.ID }}],"owned":true,"types":["tg_comment"]}"#.to_string(),
                COND_PARENT_OWNER.to_string() => String::new(),
            },
            "{{ .Owner.Username }} commented",
            "posts/{{ .Parent.ID }}/comments/{{ .Object.ID }}",
        )];

        let mut msgs = core
            .pipeline_object(&app, &change(None, Some(latest.clone())), &rules)
            .await
            .unwrap();
        msgs.sort_by_key(|m| m.recipient);
        let recipients: Vec<u64> = msgs.iter().map(|m| m.recipient).collect();
        let mut expected = vec![alice.id, bob.id];
        expected.sort_unstable();
        assert_eq!(recipients, expected);
        assert_eq!(
            msgs[0].urn,
            format!("posts/{}/comments/{}", post.id, latest.id)
        );
        assert_eq!(msgs[0].messages["en"], "carol commented");
    }

    #[tokio::test]
    async fn test_reaction_skips_own_post() {
        let core = core();
        let app = app();
        let alice = user(&core, &app, "alice").await;
        let bob = user(&core, &app, "bob").await;
        let post = core
            .post_create(&app, &Origin::application(alice.id), post_input(Visibility::Public))
            .await
            .unwrap()
            .object;

        let rules = vec![rule(
            Criteria::Reaction(CriteriaSet::default()),
            hashmap! { COND_PARENT_OWNER.to_string() => String::new() },
            "{{ .Owner.Username }} reacted with {{ .Reaction.Type }}",
            "posts/{{ .Parent.ID }}",
        )];

        let own = core
            .reaction_create(&app, alice.id, post.id, ReactionType::Love)
            .await
            .unwrap();
        let msgs = core
            .pipeline_reaction(&app, &change(None, Some(own)), &rules)
            .await
            .unwrap();
        assert!(msgs.is_empty());

        let other = core
            .reaction_create(&app, bob.id, post.id, ReactionType::Wow)
            .await
            .unwrap();
        let msgs = core
            .pipeline_reaction(&app, &change(None, Some(other)), &rules)
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].recipient, alice.id);
        assert_eq!(msgs[0].messages["en"], "bob reacted with wow");
    }

    #[tokio::test]
    async fn test_template_error_fails_pipeline() {
        let core = core();
        let app = app();
        let alice = user(&core, &app, "alice").await;
        let bob = user(&core, &app, "bob").await;
        let con = connect(&core, &app, alice.id, bob.id, ConnectionType::Follow).await;

        let rules = vec![rule(
            Criteria::Connection(CriteriaSet::default()),
            hashmap! { COND_USER_FROM.to_string() => String::new() },
            "{{ .From.Password }}",
            "users",
        )];
        let err = core
            .pipeline_connection(&app, &change(None, Some(con)), &rules)
            .await;
        assert!(matches!(err, Err(AppError::Template(_))));
    }
}
