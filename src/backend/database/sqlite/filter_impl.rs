use super::super::filter::FilterConverter;
use crate::error::{AppError, AppResult};

/// SQLite dialect: attribute arrays are walked with `json_each` and a JSON path
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteFilterConverter;

impl FilterConverter for SqliteFilterConverter {
    fn param_placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn attribute_key(&self, attr: &str) -> AppResult<String> {
        if attr.contains('"') || attr.contains('\\') {
            return Err(AppError::InvalidFilter(format!(
                "Unsupported character in attribute name: {}",
                attr
            )));
        }
        Ok(format!("$.\"{}\"", attr))
    }

    fn attribute_values(&self, key: &str) -> String {
        format!("json_each(attributes, {})", key)
    }

    fn first_value(&self, key: &str) -> String {
        format!("(SELECT value FROM json_each(attributes, {}) LIMIT 1)", key)
    }

    fn starts_with(&self, value: &str, param: &str) -> String {
        format!("substr({v}, 1, length({p})) = {p}", v = value, p = param)
    }

    fn ends_with(&self, value: &str, param: &str) -> String {
        format!(
            "substr({v}, length({v}) - length({p}) + 1) = {p}",
            v = value,
            p = param
        )
    }

    fn contains(&self, value: &str, param: &str) -> String {
        format!("instr({}, {}) > 0", value, param)
    }
}
