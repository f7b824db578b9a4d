use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::utils::{is_descendant_or_self, normalize_dn, parent_dn};

/// One stored record as the backends see it: a DN plus multi-valued string attributes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawEntry {
    pub dn: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style single value setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_values(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    pub fn normalized_dn(&self) -> String {
        normalize_dn(&self.dn)
    }

    /// Values of an attribute; an attribute with no values counts as absent
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .get(name)
            .filter(|v| !v.is_empty())
            .map(|v| v.as_slice())
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.values(name).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.values(name).is_some()
    }

    /// Copy keeping only the requested attributes; an empty request keeps all
    pub fn project(&self, attributes: &[String]) -> RawEntry {
        if attributes.is_empty() {
            return self.clone();
        }
        RawEntry {
            dn: self.dn.clone(),
            attributes: self
                .attributes
                .iter()
                .filter(|(name, _)| attributes.iter().any(|a| a == *name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        }
    }
}

/// Single attribute change applied by `update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeModification {
    /// Append values, skipping ones already present
    Add(String, Vec<String>),
    /// Replace all values; an empty list removes the attribute
    Replace(String, Vec<String>),
    /// Remove the listed values, or the whole attribute when the list is empty
    Remove(String, Vec<String>),
}

impl AttributeModification {
    pub fn attribute(&self) -> &str {
        match self {
            AttributeModification::Add(name, _)
            | AttributeModification::Replace(name, _)
            | AttributeModification::Remove(name, _) => name,
        }
    }

    pub fn apply(&self, entry: &mut RawEntry) {
        match self {
            AttributeModification::Add(name, values) => {
                let current = entry.attributes.entry(name.clone()).or_default();
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
            }
            AttributeModification::Replace(name, values) => {
                if values.is_empty() {
                    entry.attributes.remove(name);
                } else {
                    entry.attributes.insert(name.clone(), values.clone());
                }
            }
            AttributeModification::Remove(name, values) => {
                if values.is_empty() {
                    entry.attributes.remove(name);
                } else if let Some(current) = entry.attributes.get_mut(name) {
                    current.retain(|v| !values.contains(v));
                    if current.is_empty() {
                        entry.attributes.remove(name);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Base,
    #[serde(alias = "one")]
    OneLevel,
    #[default]
    #[serde(alias = "sub")]
    Subtree,
}

impl SearchScope {
    /// Scope test on normalized DNs
    pub fn contains(&self, base_norm: &str, dn_norm: &str) -> bool {
        match self {
            SearchScope::Base => dn_norm == base_norm,
            SearchScope::OneLevel => parent_dn(dn_norm) == base_norm,
            SearchScope::Subtree => is_descendant_or_self(dn_norm, base_norm),
        }
    }
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchScope::Base => write!(f, "base"),
            SearchScope::OneLevel => write!(f, "one"),
            SearchScope::Subtree => write!(f, "sub"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub attribute: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }

    /// Order two entries by the first value of the sort attribute, missing
    /// values last, ties broken by normalized DN
    pub fn compare(&self, a: &RawEntry, b: &RawEntry) -> std::cmp::Ordering {
        let ordering = match (
            a.first_value(&self.attribute),
            b.first_value(&self.attribute),
        ) {
            (Some(x), Some(y)) => match self.order {
                SortOrder::Ascending => x.cmp(y),
                SortOrder::Descending => y.cmp(x),
            },
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        ordering.then_with(|| a.normalized_dn().cmp(&b.normalized_dn()))
    }
}

/// A logical query, independent of the backend that will execute it
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub base_location: String,
    pub filter: FilterExpression,
    pub scope: SearchScope,
    /// Empty means all attributes
    pub attributes: Vec<String>,
    pub page_size: usize,
    pub start_index: u64,
    /// Zero means unbounded
    pub total_count_limit: usize,
    pub sort: Option<SortSpec>,
    /// Continue a previous scan from the token it returned
    pub resume_from: Option<ResumeToken>,
}

impl SearchRequest {
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    pub fn new(base_location: impl Into<String>, filter: FilterExpression) -> Self {
        Self {
            base_location: base_location.into(),
            filter,
            scope: SearchScope::Subtree,
            attributes: Vec::new(),
            page_size: Self::DEFAULT_PAGE_SIZE,
            start_index: 0,
            total_count_limit: 0,
            sort: None,
            resume_from: None,
        }
    }

    pub fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn start_index(mut self, start_index: u64) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn limit(mut self, total_count_limit: usize) -> Self {
        self.total_count_limit = total_count_limit;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn resume_from(mut self, token: ResumeToken) -> Self {
        self.resume_from = Some(token);
        self
    }

    pub fn normalized_base(&self) -> String {
        normalize_dn(&self.base_location)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.base_location.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Base location cannot be empty".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(AppError::InvalidRequest(
                "Page size must be greater than 0".to_string(),
            ));
        }
        self.filter.validate()
    }

    /// Everything that identifies the result set, excluding the paging window
    /// and the resume position
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{:?}",
            self.normalized_base(),
            self.scope,
            self.filter,
            self.attributes.join(","),
            self.start_index,
            self.sort
        )
    }
}

/// Backend continuation state carried between round-trips
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResumeToken {
    /// Absolute row offset, computed by the engine for offset-paged backends
    Offset(u64),
    /// Backend-issued cursor string
    Cursor(String),
    /// Paged-results control cookie
    Cookie(Vec<u8>),
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeToken::Offset(offset) => write!(f, "offset:{}", offset),
            ResumeToken::Cursor(cursor) => write!(f, "cursor:{}", cursor),
            ResumeToken::Cookie(cookie) => {
                write!(f, "cookie:{}", general_purpose::STANDARD.encode(cookie))
            }
        }
    }
}

/// Result of exactly one backend round-trip
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultPage {
    pub entries: Vec<RawEntry>,
    pub has_more: bool,
    pub cursor_state: Option<ResumeToken>,
}

impl ResultPage {
    pub fn last(entries: Vec<RawEntry>) -> Self {
        Self {
            entries,
            has_more: false,
            cursor_state: None,
        }
    }

    pub fn more(entries: Vec<RawEntry>, cursor_state: Option<ResumeToken>) -> Self {
        Self {
            entries,
            has_more: true,
            cursor_state,
        }
    }
}
