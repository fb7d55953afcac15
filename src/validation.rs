//! Kubernetes naming rules
//!
//! Names and metadata keys are checked before anything is sent to a member
//! cluster, so a malformed request fails with `INVALID_ARGUMENT` instead of
//! a remote 422.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GatewayError, GatewayResult};

const DNS1035_MAX: usize = 63;
const DNS1123_SUBDOMAIN_MAX: usize = 253;
const QUALIFIED_NAME_MAX: usize = 63;
const LABEL_VALUE_MAX: usize = 63;
const ANNOTATIONS_MAX_BYTES: usize = 256 * 1024;

static DNS1035: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("static regex")
});
static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex")
});
static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("static regex")
});

/// A DNS-1035 label: lowercase alphanumerics and `-`, starting with a letter
pub fn dns1035_label(what: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Err(GatewayError::invalid(format!("{} must not be empty", what)));
    }
    if value.len() > DNS1035_MAX {
        return Err(GatewayError::invalid(format!(
            "{} '{}' must be no more than {} characters",
            what, value, DNS1035_MAX
        )));
    }
    if !DNS1035.is_match(value) {
        return Err(GatewayError::invalid(format!(
            "{} '{}' must consist of lower case alphanumeric characters or '-', \
             start with an alphabetic character, and end with an alphanumeric character",
            what, value
        )));
    }
    Ok(())
}

/// A DNS-1123 subdomain: dot-separated DNS-1123 labels
pub fn dns1123_subdomain(what: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() || value.len() > DNS1123_SUBDOMAIN_MAX {
        return Err(GatewayError::invalid(format!(
            "{} '{}' must be 1 to {} characters",
            what, value, DNS1123_SUBDOMAIN_MAX
        )));
    }
    if !value.split('.').all(|part| DNS1123_LABEL.is_match(part)) {
        return Err(GatewayError::invalid(format!(
            "{} '{}' must be a lowercase RFC 1123 subdomain",
            what, value
        )));
    }
    Ok(())
}

/// `[prefix/]name` as used by label and annotation keys
pub fn qualified_name(value: &str) -> GatewayResult<()> {
    let (prefix, name) = match value.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, value),
    };
    if let Some(prefix) = prefix {
        dns1123_subdomain("key prefix", prefix)?;
    }
    if name.is_empty() || name.len() > QUALIFIED_NAME_MAX || !QUALIFIED_NAME.is_match(name) {
        return Err(GatewayError::invalid(format!(
            "key '{}' must be a qualified name of at most {} characters",
            value, QUALIFIED_NAME_MAX
        )));
    }
    Ok(())
}

pub fn label_value(key: &str, value: &str) -> GatewayResult<()> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > LABEL_VALUE_MAX || !QUALIFIED_NAME.is_match(value) {
        return Err(GatewayError::invalid(format!(
            "value '{}' of label '{}' is not a valid label value",
            value, key
        )));
    }
    Ok(())
}

pub fn labels(labels: &BTreeMap<String, String>) -> GatewayResult<()> {
    for (key, value) in labels {
        qualified_name(key)?;
        label_value(key, value)?;
    }
    Ok(())
}

pub fn annotations(annotations: &BTreeMap<String, String>) -> GatewayResult<()> {
    let mut size = 0;
    for (key, value) in annotations {
        qualified_name(key)?;
        size += key.len() + value.len();
    }
    if size > ANNOTATIONS_MAX_BYTES {
        return Err(GatewayError::invalid(format!(
            "annotations total {} bytes, must be at most {}",
            size, ANNOTATIONS_MAX_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns1035() {
        assert!(dns1035_label("name", "prod-1").is_ok());
        assert!(dns1035_label("name", "1prod").is_err());
        assert!(dns1035_label("name", "Prod").is_err());
        assert!(dns1035_label("name", "prod-").is_err());
        assert!(dns1035_label("name", "").is_err());
        assert!(dns1035_label("name", &"a".repeat(64)).is_err());
    }

    #[test]
    fn test_qualified_keys() {
        assert!(qualified_name("app").is_ok());
        assert!(qualified_name("app.kubernetes.io/managed-by").is_ok());
        assert!(qualified_name("kantaloupe.dynamia.ai/alias-name").is_ok());
        assert!(qualified_name("Bad_Prefix/x").is_err());
        assert!(qualified_name("-leading").is_err());
        assert!(qualified_name("a/").is_err());
    }

    #[test]
    fn test_label_maps() {
        let mut map = BTreeMap::new();
        map.insert("env".to_string(), "prod".to_string());
        map.insert("tier".to_string(), String::new());
        assert!(labels(&map).is_ok());

        map.insert("owner".to_string(), "not valid!".to_string());
        assert!(labels(&map).is_err());
        // Annotation values are free text.
        assert!(annotations(&map).is_ok());
    }
}
