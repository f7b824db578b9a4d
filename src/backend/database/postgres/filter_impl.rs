use super::super::filter::FilterConverter;
use crate::error::AppResult;

/// PostgreSQL dialect: attribute arrays are JSONB, expanded with
/// `jsonb_array_elements_text`; ordering comparisons use the "C" collation so
/// values compare byte-wise
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresFilterConverter;

impl FilterConverter for PostgresFilterConverter {
    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn attribute_key(&self, attr: &str) -> AppResult<String> {
        Ok(attr.to_string())
    }

    fn attribute_values(&self, key: &str) -> String {
        format!(
            "jsonb_array_elements_text(attributes -> {}::text) AS v(value)",
            key
        )
    }

    fn first_value(&self, key: &str) -> String {
        format!("(attributes -> {}::text ->> 0)", key)
    }

    fn starts_with(&self, value: &str, param: &str) -> String {
        format!("starts_with({}, {}::text)", value, param)
    }

    fn ends_with(&self, value: &str, param: &str) -> String {
        format!(
            "right({v}, char_length({p}::text)) = {p}::text",
            v = value,
            p = param
        )
    }

    fn contains(&self, value: &str, param: &str) -> String {
        format!("strpos({}, {}::text) > 0", value, param)
    }

    fn ordered(&self, expression: &str) -> String {
        format!("{} COLLATE \"C\"", expression)
    }
}
