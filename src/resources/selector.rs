//! Label and field selectors
//!
//! Label selectors follow the Kubernetes grammar: `k=v`, `k==v`, `k!=v`,
//! `k`, `!k`, `k in (a,b)` and `k notin (a,b)`, comma separated. Field
//! selectors accept `field=value` and `field!=value` over the fields a
//! resource kind exposes through [`super::list::Listable`].

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{GatewayError, GatewayResult};

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Requirement::In(k, vs) => write!(f, "{} in ({})", k, vs.join(",")),
            Requirement::NotIn(k, vs) => write!(f, "{} notin ({})", k, vs.join(",")),
            Requirement::Exists(k) => write!(f, "{}", k),
            Requirement::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

/// Label selector for filtering resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Create a selector that matches a specific label
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement::Equals(key.into(), value.into())],
        }
    }

    /// Create a selector that only requires a label key to be present
    pub fn exists(key: impl Into<String>) -> Self {
        Self {
            requirements: vec![Requirement::Exists(key.into())],
        }
    }

    pub fn and(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Parse a selector string
    pub fn parse(input: &str) -> GatewayResult<Self> {
        let mut requirements = Vec::new();
        for term in split_top_level(input) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            requirements.push(parse_requirement(term)?);
        }
        Ok(Self { requirements })
    }

    /// Check if labels match this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&terms.join(","))
    }
}

/// Split on commas that are not inside a parenthesized value set
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn parse_set_operator(term: &str) -> Option<(&str, &str, &str)> {
    let open = term.find('(')?;
    if !term.ends_with(')') {
        return None;
    }
    let head = term[..open].trim();
    let values = &term[open + 1..term.len() - 1];
    let mut words = head.split_whitespace();
    let key = words.next()?;
    let op = words.next()?;
    if words.next().is_some() {
        return None;
    }
    Some((key, op, values))
}

fn parse_requirement(term: &str) -> GatewayResult<Requirement> {
    let invalid = || GatewayError::invalid(format!("invalid label selector term '{}'", term));

    if let Some((key, op, values)) = parse_set_operator(term) {
        let values: Vec<String> = values
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        check_key(key).map_err(|_| invalid())?;
        return match op {
            "in" => Ok(Requirement::In(key.to_string(), values)),
            "notin" => Ok(Requirement::NotIn(key.to_string(), values)),
            _ => Err(invalid()),
        };
    }

    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        check_key(key).map_err(|_| invalid())?;
        return Ok(Requirement::NotExists(key.to_string()));
    }

    if let Some((k, v)) = term.split_once("!=") {
        check_key(k.trim()).map_err(|_| invalid())?;
        return Ok(Requirement::NotEquals(k.trim().into(), v.trim().into()));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        check_key(k.trim()).map_err(|_| invalid())?;
        return Ok(Requirement::Equals(k.trim().into(), v.trim().into()));
    }

    check_key(term).map_err(|_| invalid())?;
    Ok(Requirement::Exists(term.to_string()))
}

fn check_key(key: &str) -> Result<(), ()> {
    if key.is_empty() || key.contains(char::is_whitespace) || key.contains(['(', ')', '!', '=']) {
        return Err(());
    }
    Ok(())
}

// ============================================================================
// Field selectors
// ============================================================================

/// One `field=value` or `field!=value` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRequirement {
    pub field: String,
    pub value: String,
    pub negated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    pub requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn parse(input: &str) -> GatewayResult<Self> {
        let mut requirements = Vec::new();
        for term in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (field, value, negated) = if let Some((f, v)) = term.split_once("!=") {
                (f, v, true)
            } else if let Some((f, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                (f, v, false)
            } else {
                return Err(GatewayError::invalid(format!(
                    "invalid field selector term '{}'",
                    term
                )));
            };
            requirements.push(FieldRequirement {
                field: super::list::canonical_field(field.trim()),
                value: value.trim().to_string(),
                negated,
            });
        }
        Ok(Self { requirements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::matching("env", "prod");
        assert!(selector.matches(&labels(&[("env", "prod"), ("app", "web")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn test_parse_equality_terms() {
        let selector = LabelSelector::parse("env=prod, tier!=cache,app==web").unwrap();
        assert!(selector.matches(&labels(&[("env", "prod"), ("app", "web")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("app", "web"), ("tier", "cache")])));
    }

    #[test]
    fn test_parse_set_terms() {
        let selector = LabelSelector::parse("env in (prod, staging),zone notin (a)").unwrap();
        assert!(selector.matches(&labels(&[("env", "staging"), ("zone", "b")])));
        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("zone", "a")])));
    }

    #[test]
    fn test_parse_existence_terms() {
        let selector = LabelSelector::parse("katanloupeflow-name,!hidden").unwrap();
        assert!(selector.matches(&labels(&[("katanloupeflow-name", "x")])));
        assert!(!selector.matches(&labels(&[("katanloupeflow-name", "x"), ("hidden", "")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LabelSelector::parse("env in prod)").is_err());
        assert!(LabelSelector::parse("=prod").is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let selector = LabelSelector::parse("a=1,b in (x,y),!c").unwrap();
        assert_eq!(selector.to_string(), "a=1,b in (x,y),!c");
        assert_eq!(LabelSelector::parse(&selector.to_string()).unwrap(), selector);
    }

    #[test]
    fn test_field_selector() {
        let selector = FieldSelector::parse("metadata.name=gpu-0,status.phase!=Ready").unwrap();
        assert_eq!(selector.requirements.len(), 2);
        assert_eq!(selector.requirements[0].field, "name");
        assert!(selector.requirements[1].negated);
        assert!(FieldSelector::parse("justtext").is_err());
    }
}
