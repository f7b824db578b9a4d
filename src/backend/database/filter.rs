use crate::error::{AppError, AppResult};
use crate::filter::{CompareOp, FilterExpression};
use crate::models::{SearchScope, SortOrder, SortSpec};

/// Translates filter trees and scopes into parameterised SQL conditions
///
/// Attribute values are stored as a JSON object of string arrays, so every
/// leaf becomes an `EXISTS` over the array elements of one attribute. Dialects
/// provide the array expansion and the string functions; the tree walk is
/// shared. Every value is bound, never interpolated.
pub trait FilterConverter: Send + Sync {
    /// Parameter placeholder for a 1-based index, e.g. `$1` or `?1`
    fn param_placeholder(&self, index: usize) -> String;

    /// Bound value that selects one attribute's array
    fn attribute_key(&self, attr: &str) -> AppResult<String>;

    /// Set-returning expression yielding a `value` column with the
    /// attribute's values
    fn attribute_values(&self, key: &str) -> String;

    /// First value of the attribute, or NULL
    fn first_value(&self, key: &str) -> String;

    fn starts_with(&self, value: &str, param: &str) -> String;

    fn ends_with(&self, value: &str, param: &str) -> String;

    fn contains(&self, value: &str, param: &str) -> String;

    /// Expression compared in byte order
    fn ordered(&self, expression: &str) -> String {
        expression.to_string()
    }

    /// Convert a filter into a WHERE condition, appending its parameters
    fn to_where_clause(
        &self,
        filter: &FilterExpression,
        params: &mut Vec<String>,
    ) -> AppResult<String> {
        match filter {
            FilterExpression::Presence(attr) => {
                let key = self.push(params, self.attribute_key(attr)?);
                Ok(format!("EXISTS (SELECT 1 FROM {})", self.attribute_values(&key)))
            }
            FilterExpression::Equality(attr, value) => {
                let key = self.push(params, self.attribute_key(attr)?);
                let param = self.push(params, value.clone());
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} WHERE value = {})",
                    self.attribute_values(&key),
                    param
                ))
            }
            FilterExpression::Comparison(attr, op, value) => {
                let key = self.push(params, self.attribute_key(attr)?);
                let param = self.push(params, value.clone());
                let ordered = self.ordered("value");
                let condition = match op {
                    CompareOp::GreaterThan => format!("{} > {}", ordered, param),
                    CompareOp::GreaterOrEqual => format!("{} >= {}", ordered, param),
                    CompareOp::LessThan => format!("{} < {}", ordered, param),
                    CompareOp::LessOrEqual => format!("{} <= {}", ordered, param),
                    CompareOp::StartsWith => self.starts_with("value", &param),
                    CompareOp::EndsWith => self.ends_with("value", &param),
                    CompareOp::Contains => self.contains("value", &param),
                };
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} WHERE {})",
                    self.attribute_values(&key),
                    condition
                ))
            }
            FilterExpression::And(children) => self.join(children, " AND ", params),
            FilterExpression::Or(children) => self.join(children, " OR ", params),
            FilterExpression::Not(child) => {
                Ok(format!("NOT ({})", self.to_where_clause(child, params)?))
            }
        }
    }

    /// Scope condition on the `dn_norm` and `parent_norm` columns
    fn scope_clause(
        &self,
        scope: SearchScope,
        base_norm: &str,
        params: &mut Vec<String>,
    ) -> String {
        match scope {
            SearchScope::Base => format!("dn_norm = {}", self.push(params, base_norm.to_string())),
            SearchScope::OneLevel => {
                format!("parent_norm = {}", self.push(params, base_norm.to_string()))
            }
            SearchScope::Subtree => {
                let exact = self.push(params, base_norm.to_string());
                let below = self.push(params, format!("%,{}", escape_like(base_norm)));
                format!(
                    "(dn_norm = {} OR dn_norm LIKE {} ESCAPE '\\')",
                    exact, below
                )
            }
        }
    }

    /// ORDER BY clause; missing values sort last and ties fall back to `dn_norm`
    fn order_by(&self, sort: Option<&SortSpec>, params: &mut Vec<String>) -> AppResult<String> {
        match sort {
            None => Ok("ORDER BY dn_norm".to_string()),
            Some(spec) => {
                let key = self.push(params, self.attribute_key(&spec.attribute)?);
                let first = self.first_value(&key);
                let direction = match spec.order {
                    SortOrder::Ascending => "ASC",
                    SortOrder::Descending => "DESC",
                };
                Ok(format!(
                    "ORDER BY ({} IS NULL), {} {}, dn_norm",
                    first,
                    self.ordered(&first),
                    direction
                ))
            }
        }
    }

    #[doc(hidden)]
    fn push(&self, params: &mut Vec<String>, value: String) -> String {
        params.push(value);
        self.param_placeholder(params.len())
    }

    #[doc(hidden)]
    fn join(
        &self,
        children: &[FilterExpression],
        separator: &str,
        params: &mut Vec<String>,
    ) -> AppResult<String> {
        if children.is_empty() {
            return Err(AppError::InvalidFilter(
                "Composite filter requires at least one child".to_string(),
            ));
        }
        let parts = children
            .iter()
            .map(|child| self.to_where_clause(child, params))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(format!("({})", parts.join(separator)))
    }
}

/// Escape `LIKE` wildcards with a backslash
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
