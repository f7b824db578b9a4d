//! DN and timestamp helpers shared by every backend

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::{AppError, AppResult};

/// Formats a DateTime as LDAP generalized time with millisecond precision
///
/// Example output: "20250614100354.374Z"
pub fn encode_generalized_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S%.3fZ").to_string()
}

/// Parses generalized time, accepting values with or without fractional seconds
pub fn decode_generalized_time(value: &str) -> AppResult<DateTime<Utc>> {
    let trimmed = value.trim().trim_end_matches('Z');
    let parsed = NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y%m%d%H%M%S"))
        .map_err(|e| {
            AppError::InvalidRequest(format!("Invalid generalized time '{}': {}", value, e))
        })?;
    Ok(Utc.from_utc_datetime(&parsed))
}

fn rdn_pattern() -> &'static Regex {
    static RDN: OnceLock<Regex> = OnceLock::new();
    RDN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*=.+$").expect("valid RDN pattern"))
}

/// Normalize a DN for comparison: lower-case, no whitespace around separators
pub fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| {
            let rdn = rdn.trim();
            match rdn.split_once('=') {
                Some((attr, value)) => format!("{}={}", attr.trim(), value.trim()),
                None => rdn.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase()
}

/// Check that every RDN of a DN has the `attr=value` shape
pub fn validate_dn(dn: &str) -> AppResult<()> {
    if dn.trim().is_empty() {
        return Err(AppError::InvalidRequest("DN cannot be empty".to_string()));
    }
    for rdn in dn.split(',') {
        if !rdn_pattern().is_match(rdn.trim()) {
            return Err(AppError::InvalidRequest(format!(
                "Invalid RDN '{}' in DN '{}'",
                rdn.trim(),
                dn
            )));
        }
    }
    Ok(())
}

/// Parent of a normalized DN, or an empty string for a suffix entry
pub fn parent_dn(dn_norm: &str) -> String {
    match dn_norm.split_once(',') {
        Some((_, parent)) => parent.to_string(),
        None => String::new(),
    }
}

/// True when `dn_norm` equals `base_norm` or lies anywhere below it
pub fn is_descendant_or_self(dn_norm: &str, base_norm: &str) -> bool {
    if dn_norm == base_norm {
        return true;
    }
    dn_norm.len() > base_norm.len()
        && dn_norm.ends_with(base_norm)
        && dn_norm.as_bytes()[dn_norm.len() - base_norm.len() - 1] == b','
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_generalized_time_round_trip() {
        let dt = Utc.with_ymd_and_hms(2025, 6, 14, 10, 3, 54).unwrap();
        let encoded = encode_generalized_time(dt);
        assert_eq!(encoded, "20250614100354.000Z");
        assert_eq!(decode_generalized_time(&encoded).unwrap(), dt);
    }

    #[test]
    fn test_generalized_time_without_fraction() {
        let dt = decode_generalized_time("20200101120000Z").unwrap();
        assert_eq!(dt.hour(), 12);
        assert!(decode_generalized_time("yesterday").is_err());
    }

    #[test]
    fn test_normalize_dn() {
        assert_eq!(normalize_dn("uid=Admin, ou=People ,O=Gluu"), "uid=admin,ou=people,o=gluu");
        assert_eq!(normalize_dn(" o = gluu "), "o=gluu");
    }

    #[test]
    fn test_validate_dn() {
        assert!(validate_dn("uid=admin,ou=people,o=gluu").is_ok());
        assert!(validate_dn("").is_err());
        assert!(validate_dn("admin,o=gluu").is_err());
        assert!(validate_dn("uid=,o=gluu").is_err());
    }

    #[test]
    fn test_parent_and_descendant() {
        assert_eq!(parent_dn("uid=a,ou=people,o=gluu"), "ou=people,o=gluu");
        assert_eq!(parent_dn("o=gluu"), "");

        assert!(is_descendant_or_self("o=gluu", "o=gluu"));
        assert!(is_descendant_or_self("uid=a,ou=people,o=gluu", "o=gluu"));
        assert!(!is_descendant_or_self("o=xgluu", "o=gluu"));
        assert!(!is_descendant_or_self("o=gluu", "ou=people,o=gluu"));
    }
}
