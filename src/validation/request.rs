//! Submission validation.
//!
//! Every field is checked independently and all violations are reported
//! together, so a caller can fix a request in one round trip.

use std::path::PathBuf;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::path::{PathKind, PathValidator};
use crate::job_store::{JobOptions, DEFAULT_FORKS};

const MAX_VERBOSITY: i64 = 4;

lazy_static! {
    static ref TAG_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_]+$").unwrap();
}

/// A submission that passed validation, with resolved absolute paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub playbook_path: PathBuf,
    pub inventory_path: PathBuf,
    pub vars: Map<String, Value>,
    pub options: JobOptions,
}

#[derive(Debug, Clone)]
pub struct RequestValidator {
    paths: PathValidator,
}

impl RequestValidator {
    pub fn new(paths: PathValidator) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &PathValidator {
        &self.paths
    }

    /// Validate a raw JSON submission. An explicit `null` counts as absent.
    pub fn validate(&self, raw: &Value) -> Result<ValidatedRequest, Vec<String>> {
        let Some(data) = raw.as_object() else {
            return Err(vec!["Request body must be a JSON object".to_string()]);
        };
        let field = |name: &str| data.get(name).filter(|v| !v.is_null());

        let mut errors = Vec::new();

        let playbook_path = match field("playbook") {
            None => {
                errors.push("'playbook' is required".to_string());
                None
            }
            Some(Value::String(name)) => self
                .paths
                .resolve(PathKind::Playbook, Some(name))
                .map_err(|e| errors.push(e.to_string()))
                .ok(),
            Some(_) => {
                errors.push("'playbook' must be a string".to_string());
                None
            }
        };

        let inventory_path = match field("inventory") {
            None => self
                .paths
                .resolve(PathKind::Inventory, None)
                .map_err(|e| errors.push(e.to_string()))
                .ok(),
            Some(Value::String(name)) => self
                .paths
                .resolve(PathKind::Inventory, Some(name))
                .map_err(|e| errors.push(e.to_string()))
                .ok(),
            Some(_) => {
                errors.push("'inventory' must be a string".to_string());
                None
            }
        };

        let vars = match field("vars") {
            None => Map::new(),
            Some(Value::Object(vars)) => vars.clone(),
            Some(_) => {
                errors.push("'vars' must be a dictionary".to_string());
                Map::new()
            }
        };

        let mut options = JobOptions::default();

        if let Some(value) = field("forks") {
            match parse_integer(value) {
                Some(forks) if forks < 1 => {
                    errors.push("'forks' must be a positive integer".to_string())
                }
                Some(forks) => match u32::try_from(forks) {
                    Ok(forks) => options.forks = forks,
                    Err(_) => errors.push("'forks' must be an integer".to_string()),
                },
                None => errors.push("'forks' must be an integer".to_string()),
            }
        }

        if let Some(value) = field("verbosity") {
            match parse_integer(value) {
                Some(verbosity) if (0..=MAX_VERBOSITY).contains(&verbosity) => {
                    options.verbosity = verbosity as u8
                }
                Some(_) => errors
                    .push("'verbosity' must be an integer between 0 and 4".to_string()),
                None => errors.push("'verbosity' must be an integer".to_string()),
            }
        }

        match field("limit") {
            None => {}
            Some(Value::String(limit)) => options.limit = Some(limit.clone()),
            Some(_) => errors.push("'limit' must be a string".to_string()),
        }

        options.tags = parse_tags("tags", field("tags"), &mut errors);
        options.skip_tags = parse_tags("skip_tags", field("skip_tags"), &mut errors);

        match field("cmdline") {
            None => {}
            Some(Value::String(cmdline)) => options.cmdline = Some(cmdline.clone()),
            Some(_) => errors.push("'cmdline' must be a string".to_string()),
        }

        match (playbook_path, inventory_path) {
            (Some(playbook_path), Some(inventory_path)) if errors.is_empty() => {
                Ok(ValidatedRequest {
                    playbook_path,
                    inventory_path,
                    vars,
                    options,
                })
            }
            _ => Err(errors),
        }
    }
}

/// Accept JSON integers and integer strings.
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_tags(name: &str, value: Option<&Value>, errors: &mut Vec<String>) -> Option<Vec<String>> {
    let raw = match value? {
        Value::String(raw) => raw,
        _ => {
            errors.push(format!("'{}' must be a comma-separated string", name));
            return None;
        }
    };

    let mut tags = Vec::new();
    for tag in raw.split(',') {
        let trimmed = tag.trim();
        if TAG_PATTERN.is_match(trimmed) {
            tags.push(trimmed.to_string());
        } else {
            errors.push(format!("Invalid tag in '{}': {}", name, tag));
        }
    }
    Some(tags)
}
