//! Step prompt templates.
//!
//! A prompt is plain text with `{name}` placeholders. `{context}` is bound to
//! the step's context callback result, every other name to data collected
//! earlier in the flow. `{{` and `}}` produce literal braces. Resolution is
//! total: a placeholder without a value fails the render instead of being
//! left in place.

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Placeholder name bound to the context callback result.
pub const CONTEXT_PLACEHOLDER: &str = "context";

/// Errors raised while parsing or rendering a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("placeholder '{{{field}}}' has no value")]
    MissingField { field: String },

    #[error("unterminated placeholder starting at byte {position}")]
    Unterminated { position: usize },

    #[error("unmatched '}}' at byte {position}")]
    UnmatchedBrace { position: usize },

    #[error("empty placeholder at byte {position}")]
    EmptyPlaceholder { position: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses a template, rejecting malformed placeholders.
    pub fn parse(source: impl Into<String>) -> Result<Self, PromptError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' => {
                    if matches!(chars.peek(), Some(&(_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }

                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(PromptError::Unterminated { position }),
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(PromptError::Unterminated { position });
                    }

                    let name = name.trim();
                    if name.is_empty() {
                        return Err(PromptError::EmptyPlaceholder { position });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => {
                    if matches!(chars.peek(), Some(&(_, '}'))) {
                        chars.next();
                        literal.push('}');
                        continue;
                    }
                    return Err(PromptError::UnmatchedBrace { position });
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// The template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every placeholder, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template.
    ///
    /// `{context}` prefers the callback result and falls back to a collected
    /// field of the same name. JSON strings are inserted raw, other values as
    /// JSON text; `null` counts as missing.
    pub fn render(
        &self,
        context: Option<&str>,
        data: &BTreeMap<String, Value>,
    ) -> Result<String, PromptError> {
        let mut rendered = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(name) => {
                    let value = match (name.as_str(), context) {
                        (CONTEXT_PLACEHOLDER, Some(context)) => Some(context.to_string()),
                        _ => data.get(name).and_then(value_to_text),
                    };
                    let value = value.ok_or_else(|| PromptError::MissingField {
                        field: name.clone(),
                    })?;
                    rendered.push_str(&value);
                }
            }
        }

        Ok(rendered)
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
