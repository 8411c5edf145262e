//! Text templates for rule messages.
//!
//! A template is plain text with `{{ .Path.To.Field }}` placeholders. Paths
//! are resolved against the serialized form of a context value, so only the
//! fields a context struct exposes are reachable.

use std::sync::LazyLock;

use fanout_common::{AppError, AppResult};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("placeholder regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Field(Vec<String>),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Compile `source`. An opening `{{` that does not start a placeholder is
    /// rejected.
    pub fn parse(source: &str) -> AppResult<Self> {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_text(&mut parts, &source[last..whole.start()])?;
            parts.push(Part::Field(
                path.as_str().split('.').map(str::to_string).collect(),
            ));
            last = whole.end();
        }
        push_text(&mut parts, &source[last..])?;

        Ok(Self { parts })
    }

    /// Render against `ctx`.
    pub fn render<C: Serialize>(&self, ctx: &C) -> AppResult<String> {
        let root = serde_json::to_value(ctx)
            .map_err(|e| AppError::Template(format!("context: {e}")))?;
        self.render_value(&root)
    }

    /// Render against an already serialized context.
    pub fn render_value(&self, root: &Value) -> AppResult<String> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Field(path) => out.push_str(&lookup(root, path)?),
            }
        }
        Ok(out)
    }
}

/// Compile and render in one go.
pub fn render<C: Serialize>(source: &str, ctx: &C) -> AppResult<String> {
    Template::parse(source)?.render(ctx)
}

fn push_text(parts: &mut Vec<Part>, text: &str) -> AppResult<()> {
    if text.contains("{{") {
        return Err(AppError::Template(format!("malformed placeholder in '{text}'")));
    }
    if !text.is_empty() {
        parts.push(Part::Text(text.to_string()));
    }
    Ok(())
}

fn lookup(root: &Value, path: &[String]) -> AppResult<String> {
    let mut current = root;
    for key in path {
        match current {
            Value::Null => return Ok(String::new()),
            Value::Object(map) => {
                current = map.get(key).ok_or_else(|| {
                    AppError::Template(format!("can't evaluate field {key} in .{}", path.join(".")))
                })?;
            }
            _ => {
                return Err(AppError::Template(format!(
                    "can't evaluate field {key} in .{}",
                    path.join(".")
                )));
            }
        }
    }

    Ok(match current {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_fields() {
        let ctx = json!({
            "Owner": { "Username": "alice", "ID": 12 },
            "Attachments": { "body": { "en": "hello" } },
        });
        let tpl = Template::parse("{{.Owner.Username}} ({{ .Owner.ID }}) said {{ .Attachments.body.en }}").unwrap();
        assert_eq!(tpl.render_value(&ctx).unwrap(), "alice (12) said hello");
    }

    #[test]
    fn test_null_renders_empty() {
        let ctx = json!({ "Parent": null });
        assert_eq!(render("[{{ .Parent.ID }}]", &ctx).unwrap(), "[]");
    }

    #[test]
    fn test_unknown_field() {
        let ctx = json!({ "Owner": { "Username": "alice" } });
        let err = render("{{ .Owner.Password }}", &ctx);
        assert!(matches!(err, Err(AppError::Template(_))));
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            Template::parse("{{ Owner }}"),
            Err(AppError::Template(_))
        ));
        assert!(Template::parse("no placeholders").is_ok());
    }

    #[test]
    fn test_json_document() {
        let ctx = json!({ "Object": { "ObjectID": 42 } });
        let out = render(r#"{"object_ids":[{{ .Object.ObjectID }}],"owned":{"x":true}}"#, &ctx).unwrap();
        assert_eq!(out, r#"{"object_ids":[42],"owned":{"x":true}}"#);
    }
}
