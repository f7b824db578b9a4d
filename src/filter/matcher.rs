//! In-process evaluation of a filter tree against a raw entry
//!
//! Used by the document and directory backends. A leaf matches when any value
//! of the attribute satisfies it, the same semantics the SQL converters produce
//! with `EXISTS` over the stored value arrays.

use super::expression::FilterExpression;
use crate::models::{RawEntry, SearchRequest};

pub fn matches(filter: &FilterExpression, entry: &RawEntry) -> bool {
    match filter {
        FilterExpression::Presence(attr) => entry.has_attribute(attr),
        FilterExpression::Equality(attr, value) => entry
            .values(attr)
            .map(|values| values.iter().any(|v| v == value))
            .unwrap_or(false),
        FilterExpression::Comparison(attr, op, value) => entry
            .values(attr)
            .map(|values| values.iter().any(|v| op.matches(v, value)))
            .unwrap_or(false),
        FilterExpression::And(children) => children.iter().all(|c| matches(c, entry)),
        FilterExpression::Or(children) => children.iter().any(|c| matches(c, entry)),
        FilterExpression::Not(child) => !matches(child, entry),
    }
}

/// Entries (keyed by normalized DN) inside the request's scope that match its
/// filter, in key order or in the request's sort order
pub fn select<'a, I>(entries: I, request: &SearchRequest) -> Vec<&'a RawEntry>
where
    I: IntoIterator<Item = (&'a String, &'a RawEntry)>,
{
    let base = request.normalized_base();
    let mut selected: Vec<&RawEntry> = entries
        .into_iter()
        .filter(|(dn_norm, _)| request.scope.contains(&base, dn_norm))
        .filter(|(_, entry)| matches(&request.filter, entry))
        .map(|(_, entry)| entry)
        .collect();

    if let Some(sort) = &request.sort {
        selected.sort_by(|a, b| sort.compare(a, b));
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CompareOp;

    fn token() -> RawEntry {
        RawEntry::new("tknCde=1,ou=tokens,o=gluu")
            .with("objectClass", "jansToken")
            .with("exp", "20240101000000.000Z")
            .with("scope", "openid")
            .with("scope", "profile")
    }

    #[test]
    fn test_presence_and_equality() {
        let e = token();
        assert!(matches(&FilterExpression::Presence("exp".into()), &e));
        assert!(!matches(&FilterExpression::Presence("del".into()), &e));
        assert!(matches(
            &FilterExpression::Equality("scope".into(), "profile".into()),
            &e
        ));
        assert!(!matches(
            &FilterExpression::Equality("scope".into(), "email".into()),
            &e
        ));
    }

    #[test]
    fn test_comparisons() {
        let e = token();
        let before = FilterExpression::Comparison(
            "exp".into(),
            CompareOp::LessOrEqual,
            "20250101000000.000Z".into(),
        );
        assert!(matches(&before, &e));

        let after = FilterExpression::Comparison(
            "exp".into(),
            CompareOp::GreaterThan,
            "20250101000000.000Z".into(),
        );
        assert!(!matches(&after, &e));

        let scope = |op, value: &str| {
            FilterExpression::Comparison("scope".into(), op, value.to_string())
        };
        assert!(matches(&scope(CompareOp::StartsWith, "pro"), &e));
        assert!(matches(&scope(CompareOp::EndsWith, "nid"), &e));
        assert!(matches(&scope(CompareOp::Contains, "rofi"), &e));
    }

    #[test]
    fn test_boolean_composition() {
        let e = token();
        let filter = FilterExpression::And(vec![
            FilterExpression::Presence("exp".into()),
            FilterExpression::Or(vec![
                FilterExpression::Equality("scope".into(), "email".into()),
                FilterExpression::Equality("scope".into(), "openid".into()),
            ]),
            FilterExpression::Not(Box::new(FilterExpression::Presence("del".into()))),
        ]);
        assert!(matches(&filter, &e));

        let negated = FilterExpression::Not(Box::new(filter));
        assert!(!matches(&negated, &e));
    }

    #[test]
    fn test_select_applies_scope_filter_and_sort() {
        use crate::models::{SearchScope, SortSpec};
        use std::collections::BTreeMap;

        let mut store = BTreeMap::new();
        for (dn, exp) in [
            ("ou=tokens,o=gluu", None),
            ("tkn=a,ou=tokens,o=gluu", Some("3")),
            ("tkn=b,ou=tokens,o=gluu", Some("1")),
            ("tkn=c,ou=tokens,o=gluu", None),
            ("tkn=d,ou=other,o=gluu", Some("2")),
        ] {
            let mut entry = RawEntry::new(dn);
            if let Some(exp) = exp {
                entry = entry.with("exp", exp);
            }
            store.insert(dn.to_string(), entry);
        }

        let exp = FilterExpression::Presence("exp".into());
        let request = SearchRequest::new("ou=tokens,o=gluu", exp)
            .scope(SearchScope::OneLevel)
            .sort(SortSpec::ascending("exp"));
        let selected: Vec<&str> = select(&store, &request)
            .into_iter()
            .map(|e| e.dn.as_str())
            .collect();
        assert_eq!(selected, vec!["tkn=b,ou=tokens,o=gluu", "tkn=a,ou=tokens,o=gluu"]);
    }
}
