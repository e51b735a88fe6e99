//! Prompt assembly — closed templates rendered into ordered prompt parts.
//!
//! Template source syntax:
//!
//! ```text
//! Design a logo for {{concept}}.
//! {{#if style}}Use a {{style}} style.{{/if}}
//! {{#unless colors}}Pick a palette that fits the concept.{{/unless}}
//! {{media reference}}
//! ```
//!
//! - `{{path}}` substitutes a field as text (dotted paths reach nested objects)
//! - `{{media path}}` inserts a field as media part(s)
//! - `{{#if path}}…{{/if}}` / `{{#unless path}}…{{/unless}}` test for presence
//!
//! Templates are parsed once when a flow is defined. Input values are only
//! ever substituted, never parsed, so input cannot add sections or tags.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{BackendRequest, GenerationOptions, PromptPart};

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("path pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated tag at byte {0}")]
    Unterminated(usize),

    #[error("invalid tag '{{{{{0}}}}}'")]
    InvalidTag(String),

    #[error("'{{{{/{0}}}}}' without a matching opening tag")]
    UnexpectedClose(String),

    #[error("'{{{{#{expected} {field}}}}}' closed by '{{{{/{found}}}}}'")]
    Mismatched {
        expected: String,
        field: String,
        found: String,
    },

    #[error("'{{{{#{kind} {field}}}}}' is never closed")]
    Unclosed { kind: String, field: String },
}

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateNode {
    Literal(String),
    Field(String),
    Media(String),
    IfPresent { field: String, body: Vec<TemplateNode> },
    IfAbsent { field: String, body: Vec<TemplateNode> },
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    nodes: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    Unless,
}

impl Block {
    fn keyword(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::Unless => "unless",
        }
    }
}

enum Tag {
    Field(String),
    Media(String),
    Open(Block, String),
    Close(Block),
}

impl Template {
    /// Build a template directly from nodes.
    pub fn from_nodes(nodes: Vec<TemplateNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    /// Parse template source text.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut stack: Vec<(Block, String, Vec<TemplateNode>)> = Vec::new();
        let mut current: Vec<TemplateNode> = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                current.push(TemplateNode::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(TemplateError::Unterminated(offset + start))?;

            match classify(after[..end].trim())? {
                Tag::Field(path) => current.push(TemplateNode::Field(path)),
                Tag::Media(path) => current.push(TemplateNode::Media(path)),
                Tag::Open(block, field) => {
                    stack.push((block, field, std::mem::take(&mut current)));
                }
                Tag::Close(block) => {
                    let (open, field, parent) = stack.pop().ok_or_else(|| {
                        TemplateError::UnexpectedClose(block.keyword().to_string())
                    })?;
                    if open != block {
                        return Err(TemplateError::Mismatched {
                            expected: open.keyword().to_string(),
                            field,
                            found: block.keyword().to_string(),
                        });
                    }
                    let body = std::mem::replace(&mut current, parent);
                    current.push(match block {
                        Block::If => TemplateNode::IfPresent { field, body },
                        Block::Unless => TemplateNode::IfAbsent { field, body },
                    });
                }
            }

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            current.push(TemplateNode::Literal(rest.to_string()));
        }
        if let Some((block, field, _)) = stack.pop() {
            return Err(TemplateError::Unclosed {
                kind: block.keyword().to_string(),
                field,
            });
        }

        Ok(Self { nodes: current })
    }

    /// Top-level input fields the template refers to.
    pub fn referenced_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        collect_fields(&self.nodes, &mut fields);
        fields
    }

    /// Render into an ordered sequence of prompt parts.
    ///
    /// Adjacent text is merged and trimmed; whitespace-only text is dropped.
    pub fn render(&self, input: &Value) -> Vec<PromptPart> {
        let mut parts = Vec::new();
        let mut text = String::new();
        render_nodes(&self.nodes, input, &mut text, &mut parts);
        flush_text(&mut text, &mut parts);
        parts
    }

    /// Source text equivalent to this template.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        write_source(&self.nodes, &mut out);
        out
    }
}

/// Assemble a backend request from a template and already validated input.
///
/// Pure and deterministic: the same arguments always produce the same request.
pub fn assemble(
    template: &Template,
    input: &Value,
    backend: &str,
    options: Option<&GenerationOptions>,
) -> BackendRequest {
    BackendRequest {
        backend: backend.to_string(),
        parts: template.render(input),
        options: options.cloned(),
    }
}

fn classify(tag: &str) -> Result<Tag, TemplateError> {
    let invalid = || TemplateError::InvalidTag(tag.to_string());
    let path = |s: &str| -> Result<String, TemplateError> {
        let s = s.trim();
        if PATH_RE.is_match(s) {
            Ok(s.to_string())
        } else {
            Err(invalid())
        }
    };

    if let Some(rest) = tag.strip_prefix("#if ") {
        Ok(Tag::Open(Block::If, path(rest)?))
    } else if let Some(rest) = tag.strip_prefix("#unless ") {
        Ok(Tag::Open(Block::Unless, path(rest)?))
    } else if tag == "/if" {
        Ok(Tag::Close(Block::If))
    } else if tag == "/unless" {
        Ok(Tag::Close(Block::Unless))
    } else if let Some(rest) = tag.strip_prefix("media ") {
        Ok(Tag::Media(path(rest)?))
    } else {
        Ok(Tag::Field(path(tag)?))
    }
}

fn collect_fields(nodes: &[TemplateNode], fields: &mut BTreeSet<String>) {
    let root = |path: &str| path.split('.').next().unwrap_or(path).to_string();
    for node in nodes {
        match node {
            TemplateNode::Literal(_) => {}
            TemplateNode::Field(path) | TemplateNode::Media(path) => {
                fields.insert(root(path));
            }
            TemplateNode::IfPresent { field, body } | TemplateNode::IfAbsent { field, body } => {
                fields.insert(root(field));
                collect_fields(body, fields);
            }
        }
    }
}

fn lookup<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(input, |value, key| value.get(key))
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

fn render_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn render_nodes(
    nodes: &[TemplateNode],
    input: &Value,
    text: &mut String,
    parts: &mut Vec<PromptPart>,
) {
    for node in nodes {
        match node {
            TemplateNode::Literal(literal) => text.push_str(literal),
            TemplateNode::Field(path) => {
                if let Some(value) = lookup(input, path) {
                    text.push_str(&render_text(value));
                }
            }
            TemplateNode::Media(path) => {
                let urls: Vec<&str> = match lookup(input, path) {
                    Some(Value::String(url)) => vec![url.as_str()],
                    Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str()).collect(),
                    _ => Vec::new(),
                };
                if !urls.is_empty() {
                    flush_text(text, parts);
                    parts.extend(urls.into_iter().map(PromptPart::media));
                }
            }
            TemplateNode::IfPresent { field, body } => {
                if is_present(lookup(input, field)) {
                    render_nodes(body, input, text, parts);
                }
            }
            TemplateNode::IfAbsent { field, body } => {
                if !is_present(lookup(input, field)) {
                    render_nodes(body, input, text, parts);
                }
            }
        }
    }
}

fn flush_text(text: &mut String, parts: &mut Vec<PromptPart>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        parts.push(PromptPart::text(trimmed));
    }
    text.clear();
}

fn write_source(nodes: &[TemplateNode], out: &mut String) {
    for node in nodes {
        match node {
            TemplateNode::Literal(literal) => out.push_str(literal),
            TemplateNode::Field(path) => out.push_str(&format!("{{{{{}}}}}", path)),
            TemplateNode::Media(path) => out.push_str(&format!("{{{{media {}}}}}", path)),
            TemplateNode::IfPresent { field, body } => {
                out.push_str(&format!("{{{{#if {}}}}}", field));
                write_source(body, out);
                out.push_str("{{/if}}");
            }
            TemplateNode::IfAbsent { field, body } => {
                out.push_str(&format!("{{{{#unless {}}}}}", field));
                write_source(body, out);
                out.push_str("{{/unless}}");
            }
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_source())
    }
}

impl TryFrom<String> for Template {
    type Error = TemplateError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::parse(&source)
    }
}

impl From<Template> for String {
    fn from(template: Template) -> Self {
        template.to_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const OUTLINE_TEMPLATE: &str = "Write a description of {{productName}}.\n\
        {{#if outline}}Follow this outline:\n{{outline}}\n{{/if}}\
        {{#unless features}}Infer the key features yourself.{{/unless}}\
        {{media image}}Keep it under 120 words.";

    #[test]
    fn test_parse_and_source_roundtrip() {
        let template = Template::parse(OUTLINE_TEMPLATE).unwrap();
        assert_eq!(template.to_source(), OUTLINE_TEMPLATE);
        assert_eq!(
            template.referenced_fields().into_iter().collect::<Vec<_>>(),
            vec!["features", "image", "outline", "productName"]
        );
    }

    #[test]
    fn test_conditional_section_included_only_when_present() {
        let template = Template::parse(OUTLINE_TEMPLATE).unwrap();

        let without = template.render(&json!({ "productName": "Mug", "features": ["ceramic"] }));
        assert_eq!(
            without,
            vec![PromptPart::text(
                "Write a description of Mug.\nKeep it under 120 words."
            )]
        );

        let with = template.render(&json!({ "productName": "Mug", "outline": "1. Intro" }));
        assert_eq!(
            with,
            vec![PromptPart::text(
                "Write a description of Mug.\nFollow this outline:\n1. Intro\n\
                 Infer the key features yourself.Keep it under 120 words.",
            )]
        );
    }

    #[test]
    fn test_media_interleaves_with_text() {
        let template =
            Template::parse("Edit this image: {{media images}} Make it brighter.").unwrap();
        let parts = template.render(&json!({
            "images": ["data:image/png;base64,AAAA", "https://cdn.example.com/b.png"]
        }));
        assert_eq!(
            parts,
            vec![
                PromptPart::text("Edit this image:"),
                PromptPart::media("data:image/png;base64,AAAA"),
                PromptPart::media("https://cdn.example.com/b.png"),
                PromptPart::text("Make it brighter."),
            ]
        );
    }

    #[test]
    fn test_values_render_as_text() {
        let template = Template::parse("{{features}} | {{variation}} | {{size.width}}").unwrap();
        let parts = template.render(&json!({
            "features": ["ceramic", "350ml"],
            "variation": 2,
            "size": { "width": 8 }
        }));
        assert_eq!(parts, vec![PromptPart::text("ceramic, 350ml | 2 | 8")]);
    }

    #[test]
    fn test_input_cannot_inject_tags() {
        let template = Template::parse("Concept: {{concept}}").unwrap();
        let parts = template.render(&json!({ "concept": "{{#if secret}}{{secret}}{{/if}}" }));
        assert_eq!(
            parts,
            vec![PromptPart::text("Concept: {{#if secret}}{{secret}}{{/if}}")]
        );
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let template = Template::parse(OUTLINE_TEMPLATE).unwrap();
        let input = json!({ "productName": "Mug", "image": "data:image/png;base64,AAAA" });
        let options = GenerationOptions {
            temperature: Some(0.4),
            ..Default::default()
        };
        let first = assemble(&template, &input, "gemini-2.0-flash", Some(&options));
        let second = assemble(&template, &input, "gemini-2.0-flash", Some(&options));
        assert_eq!(first, second);
        assert_eq!(first.parts.len(), 3);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Template::parse("Hello {{name"),
            Err(TemplateError::Unterminated(6))
        );
        assert_eq!(
            Template::parse("{{#if a}}x"),
            Err(TemplateError::Unclosed {
                kind: "if".to_string(),
                field: "a".to_string()
            })
        );
        assert_eq!(
            Template::parse("x{{/unless}}"),
            Err(TemplateError::UnexpectedClose("unless".to_string()))
        );
        assert!(matches!(
            Template::parse("{{#if a}}x{{/unless}}"),
            Err(TemplateError::Mismatched { .. })
        ));
        assert_eq!(
            Template::parse("{{ some thing }}"),
            Err(TemplateError::InvalidTag("some thing".to_string()))
        );
    }

    #[test]
    fn test_template_deserializes_from_string() {
        let template: Template = serde_yaml::from_str("\"Logo for {{concept}}\"").unwrap();
        assert_eq!(template.referenced_fields().len(), 1);
        assert!(serde_yaml::from_str::<Template>("\"{{#if x}}\"").is_err());
    }
}
