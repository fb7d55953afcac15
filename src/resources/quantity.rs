//! Kubernetes resource quantities ("500m", "10Gi", "1e3")

use crate::error::{GatewayError, GatewayResult};

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity into its base-unit value
pub fn parse_quantity(raw: &str) -> GatewayResult<f64> {
    let s = raw.trim();
    let invalid = || GatewayError::invalid(format!("invalid quantity '{}'", raw));
    if s.is_empty() {
        return Err(invalid());
    }

    for (suffix, mult) in BINARY_SUFFIXES {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.parse::<f64>().map(|n| n * mult).map_err(|_| invalid());
        }
    }
    // Exponent forms like "1e3" end in a digit and parse directly.
    if let Ok(n) = s.parse::<f64>() {
        return Ok(n);
    }
    for (suffix, mult) in DECIMAL_SUFFIXES {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.parse::<f64>().map(|n| n * mult).map_err(|_| invalid());
        }
    }
    Err(invalid())
}

/// Parse a quantity, rounding up to a whole number
pub fn parse_quantity_ceil(raw: &str) -> GatewayResult<i64> {
    parse_quantity(raw).map(|v| v.ceil() as i64)
}

/// CPU quantity in millicores
pub fn parse_millis(raw: &str) -> GatewayResult<i64> {
    parse_quantity(raw).map(|v| (v * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_suffixed() {
        assert_eq!(parse_quantity("4").unwrap(), 4.0);
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024.0);
        assert_eq!(parse_quantity("2Gi").unwrap(), 2.0 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("3k").unwrap(), 3000.0);
        assert_eq!(parse_quantity("1e3").unwrap(), 1000.0);
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("500m").unwrap(), 500);
        assert_eq!(parse_millis("2").unwrap(), 2000);
        assert_eq!(parse_millis("0.25").unwrap(), 250);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("lots").is_err());
        assert!(parse_quantity("12Qi").is_err());
    }
}
