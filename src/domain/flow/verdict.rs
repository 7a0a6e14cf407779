//! Evaluator prompts and verdict parsing for judged steps.
//!
//! Evaluators are asked for a JSON object with a string `status`, a string
//! `comment` and any number of extra fields. Models often wrap the object in
//! a fenced code block or surround it with prose, so the parser tries each
//! balanced object in turn until one holds a usable verdict.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use super::message::Transcript;

const TRANSCRIPT_HEADER: &str = "Here's the previous conversation with the Human (User):\n----\n";
const TRANSCRIPT_FOOTER: &str = "\n----\n\n";

/// Builds the single system message sent to an evaluator.
pub fn evaluator_prompt(transcript: &Transcript, instructions: &str, data_fields: &[String]) -> String {
    let mut prompt = format!(
        "{}{}{}{}",
        TRANSCRIPT_HEADER,
        transcript.render_lines(),
        TRANSCRIPT_FOOTER,
        instructions
    );
    if !data_fields.is_empty() {
        prompt.push_str(&format!(
            "\nAlongside \"status\" and \"comment\", include these fields once the user has provided them: {}.",
            data_fields.join(", ")
        ));
    }
    prompt
}

/// Why an evaluator reply could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerdictError {
    #[error("no JSON object found in evaluator output")]
    NoJson,

    #[error("evaluator output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("evaluator output lacks a string '{0}' field")]
    MissingField(&'static str),
}

/// A parsed evaluator reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: String,
    pub comment: String,
    /// Every key besides `status` and `comment`.
    pub fields: BTreeMap<String, Value>,
}

impl Verdict {
    /// Parses the first usable verdict in `output`.
    ///
    /// When no candidate works, the error of the first candidate is returned.
    pub fn parse(output: &str) -> Result<Self, VerdictError> {
        let trimmed = output.trim();
        let body = code_block(trimmed).unwrap_or(trimmed);

        let mut first_error = None;
        for candidate in json_objects(body) {
            match Self::from_object_text(candidate) {
                Ok(verdict) => return Ok(verdict),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(VerdictError::NoJson))
    }

    fn from_object_text(candidate: &str) -> Result<Self, VerdictError> {
        let mut object: Map<String, Value> = serde_json::from_str(candidate)
            .map_err(|e| VerdictError::InvalidJson(e.to_string()))?;

        let status = take_string(&mut object, "status")?;
        let comment = take_string(&mut object, "comment")?;

        Ok(Self {
            status: status.trim().to_string(),
            comment,
            fields: object.into_iter().collect(),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

fn take_string(object: &mut Map<String, Value>, key: &'static str) -> Result<String, VerdictError> {
    match object.remove(key) {
        Some(Value::String(value)) => Ok(value),
        _ => Err(VerdictError::MissingField(key)),
    }
}

/// Balanced `{...}` spans of `body`, in order of their opening brace.
fn json_objects(body: &str) -> impl Iterator<Item = &str> {
    body.match_indices('{')
        .filter_map(move |(start, _)| balanced_object(body, start))
}

fn code_block(s: &str) -> Option<&str> {
    for pattern in ["```json\n", "```json\r\n", "```\n", "```\r\n"] {
        if let Some(start) = s.find(pattern) {
            let body_start = start + pattern.len();
            if let Some(end) = s[body_start..].find("```") {
                return Some(s[body_start..body_start + end].trim());
            }
        }
    }
    None
}

fn balanced_object(s: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, c) in s[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&s[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
