//! Statement building and row handling shared by the SQLite and PostgreSQL
//! services

use std::collections::BTreeMap;

use super::filter::{escape_like, FilterConverter};
use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::models::{RawEntry, ResultPage, ResumeToken, SearchRequest, SearchScope};
use crate::utils::{normalize_dn, parent_dn, validate_dn};

/// Column values of one stored entry
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub dn: String,
    pub dn_norm: String,
    pub parent_norm: String,
    pub attributes: String,
}

impl StoredEntry {
    pub fn prepare(entry: &RawEntry) -> AppResult<Self> {
        validate_dn(&entry.dn)?;
        let dn_norm = normalize_dn(&entry.dn);
        Ok(Self {
            dn: entry.dn.clone(),
            parent_norm: parent_dn(&dn_norm),
            dn_norm,
            attributes: encode_attributes(&entry.attributes)?,
        })
    }
}

pub fn encode_attributes(attributes: &BTreeMap<String, Vec<String>>) -> AppResult<String> {
    Ok(serde_json::to_string(attributes)?)
}

/// Rebuild an entry from its stored columns, projected to `attributes`
pub fn decode_entry(dn: String, attributes: &str, projection: &[String]) -> AppResult<RawEntry> {
    let attributes: BTreeMap<String, Vec<String>> = serde_json::from_str(attributes)?;
    let entry = RawEntry { dn, attributes };
    if projection.is_empty() {
        Ok(entry)
    } else {
        Ok(entry.project(projection))
    }
}

/// Parameters for the subtree delete: exact DN and the `LIKE` pattern for descendants
pub fn subtree_params(dn: &str) -> (String, String) {
    let dn_norm = normalize_dn(dn);
    let pattern = format!("%,{}", escape_like(&dn_norm));
    (dn_norm, pattern)
}

/// Absolute offset of the next window
///
/// Offset-paged stores only understand engine-computed offsets; the first
/// round-trip starts at the request's start index.
pub fn resume_offset(request: &SearchRequest, resume: Option<&ResumeToken>) -> AppResult<u64> {
    match resume {
        None => Ok(request.start_index),
        Some(ResumeToken::Offset(offset)) => Ok(*offset),
        Some(other) => Err(AppError::Search(format!(
            "Relational store cannot resume from {}",
            other
        ))),
    }
}

/// One window of a search: SQL text plus bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStatement {
    pub sql: String,
    pub params: Vec<String>,
    /// Rows requested from the database, one more than the window
    pub fetch: usize,
}

/// `SELECT` for one window, reading one extra row to learn whether more exist
pub fn build_search(
    converter: &dyn FilterConverter,
    table: &str,
    attributes_column: &str,
    request: &SearchRequest,
    offset: u64,
) -> AppResult<SearchStatement> {
    let mut params = Vec::new();
    let scope = converter.scope_clause(request.scope, &request.normalized_base(), &mut params);
    let filter = converter.to_where_clause(&request.filter, &mut params)?;
    let order_by = converter.order_by(request.sort.as_ref(), &mut params)?;
    let fetch = request.page_size.saturating_add(1);

    let sql = format!(
        "SELECT dn, {} AS attributes FROM {} WHERE {} AND {} {} LIMIT {} OFFSET {}",
        attributes_column, table, scope, filter, order_by, fetch, offset
    );
    Ok(SearchStatement { sql, params, fetch })
}

/// `DELETE` of the subtree entries matching `filter`, the first `count` of
/// them by normalized DN when `count` is non-zero
pub fn build_delete(
    converter: &dyn FilterConverter,
    table: &str,
    base: &str,
    filter: &FilterExpression,
    count: usize,
) -> AppResult<(String, Vec<String>)> {
    filter.validate()?;
    let mut params = Vec::new();
    let scope = converter.scope_clause(SearchScope::Subtree, &normalize_dn(base), &mut params);
    let filter = converter.to_where_clause(filter, &mut params)?;
    let limit = match count {
        0 => String::new(),
        n => format!(" LIMIT {}", n),
    };

    let sql = format!(
        "DELETE FROM {t} WHERE dn_norm IN \
         (SELECT dn_norm FROM {t} WHERE {} AND {} ORDER BY dn_norm{})",
        scope,
        filter,
        limit,
        t = table
    );
    Ok((sql, params))
}

/// Cut the look-ahead row off and report whether it existed
pub fn into_page(mut entries: Vec<RawEntry>, window: usize) -> ResultPage {
    if entries.len() > window {
        entries.truncate(window);
        ResultPage::more(entries, None)
    } else {
        ResultPage::last(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::database::sqlite::SqliteFilterConverter;

    #[test]
    fn test_prepare_entry() {
        let entry = RawEntry::new("uid=Alice, ou=People,o=gluu").with("uid", "Alice");
        let stored = StoredEntry::prepare(&entry).unwrap();
        assert_eq!(stored.dn_norm, "uid=alice,ou=people,o=gluu");
        assert_eq!(stored.parent_norm, "ou=people,o=gluu");
        assert_eq!(stored.attributes, r#"{"uid":["Alice"]}"#);

        assert!(StoredEntry::prepare(&RawEntry::new("not a dn")).is_err());
    }

    #[test]
    fn test_decode_projects() {
        let entry = decode_entry(
            "uid=a,o=gluu".to_string(),
            r#"{"uid":["a"],"mail":["a@example.org"]}"#,
            &["mail".to_string()],
        )
        .unwrap();
        assert!(!entry.has_attribute("uid"));
        assert_eq!(entry.first_value("mail"), Some("a@example.org"));
    }

    #[test]
    fn test_resume_offset() {
        let request = SearchRequest::new("o=gluu", FilterExpression::Presence("uid".into()))
            .start_index(5);
        assert_eq!(resume_offset(&request, None).unwrap(), 5);
        assert_eq!(
            resume_offset(&request, Some(&ResumeToken::Offset(105))).unwrap(),
            105
        );
        assert!(matches!(
            resume_offset(&request, Some(&ResumeToken::Cookie(vec![1]))),
            Err(AppError::Search(_))
        ));
    }

    #[test]
    fn test_build_search_binds_everything() {
        let request = SearchRequest::new(
            "ou=people,o=gluu",
            FilterExpression::Equality("uid".into(), "x' OR 1=1 --".into()),
        )
        .scope(SearchScope::OneLevel)
        .page_size(10);
        let statement =
            build_search(&SqliteFilterConverter, "entries", "attributes", &request, 20).unwrap();

        assert!(!statement.sql.contains("OR 1=1"));
        assert!(statement.sql.ends_with("LIMIT 11 OFFSET 20"));
        assert_eq!(statement.fetch, 11);
        assert_eq!(
            statement.params,
            vec![
                "ou=people,o=gluu".to_string(),
                "$.\"uid\"".to_string(),
                "x' OR 1=1 --".to_string()
            ]
        );
    }

    #[test]
    fn test_build_delete_limits_in_dn_order() {
        let filter = FilterExpression::Equality("tknTyp".into(), "refresh_token".into());
        let (sql, params) =
            build_delete(&SqliteFilterConverter, "entries", "OU=Tokens,o=gluu", &filter, 5)
                .unwrap();
        assert!(sql.starts_with("DELETE FROM entries WHERE dn_norm IN (SELECT dn_norm"));
        assert!(sql.ends_with("ORDER BY dn_norm LIMIT 5)"));
        assert_eq!(params[0], "ou=tokens,o=gluu");
        assert_eq!(params.last().map(String::as_str), Some("refresh_token"));

        let (sql, _) =
            build_delete(&SqliteFilterConverter, "entries", "o=gluu", &filter, 0).unwrap();
        assert!(!sql.contains("LIMIT"));

        assert!(matches!(
            build_delete(
                &SqliteFilterConverter,
                "entries",
                "o=gluu",
                &FilterExpression::And(Vec::new()),
                0
            ),
            Err(AppError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_into_page() {
        let rows: Vec<RawEntry> = (0..4)
            .map(|i| RawEntry::new(format!("uid={},o=gluu", i)))
            .collect();
        let page = into_page(rows.clone(), 3);
        assert!(page.has_more);
        assert_eq!(page.entries.len(), 3);

        let page = into_page(rows, 4);
        assert!(!page.has_more);
        assert!(page.cursor_state.is_none());
    }
}
