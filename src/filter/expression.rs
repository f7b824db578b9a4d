use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// Comparison operators usable in a `Comparison` leaf
///
/// Values are compared as strings (byte order), which keeps generalized-time
/// and zero-padded numeric attributes ordered the same way on every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    StartsWith,
    EndsWith,
    Contains,
}

impl CompareOp {
    pub fn matches(&self, candidate: &str, value: &str) -> bool {
        match self {
            CompareOp::GreaterThan => candidate > value,
            CompareOp::GreaterOrEqual => candidate >= value,
            CompareOp::LessThan => candidate < value,
            CompareOp::LessOrEqual => candidate <= value,
            CompareOp::StartsWith => candidate.starts_with(value),
            CompareOp::EndsWith => candidate.ends_with(value),
            CompareOp::Contains => candidate.contains(value),
        }
    }
}

/// Backend-independent boolean filter tree
///
/// Build it through the checked constructors (`presence`, `equality`, `and`, ...)
/// or call [`FilterExpression::validate`] on a tree assembled by hand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterExpression {
    Presence(String),
    Equality(String, String),
    Comparison(String, CompareOp, String),
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Not(Box<FilterExpression>),
}

fn check_attribute(attr: &str) -> AppResult<()> {
    if attr.trim().is_empty() {
        return Err(AppError::InvalidFilter(
            "Attribute name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

impl FilterExpression {
    pub fn presence(attr: impl Into<String>) -> AppResult<Self> {
        let attr = attr.into();
        check_attribute(&attr)?;
        Ok(FilterExpression::Presence(attr))
    }

    pub fn equality(attr: impl Into<String>, value: impl Into<String>) -> AppResult<Self> {
        let attr = attr.into();
        check_attribute(&attr)?;
        Ok(FilterExpression::Equality(attr, value.into()))
    }

    pub fn comparison(
        attr: impl Into<String>,
        op: CompareOp,
        value: impl Into<String>,
    ) -> AppResult<Self> {
        let attr = attr.into();
        check_attribute(&attr)?;
        Ok(FilterExpression::Comparison(attr, op, value.into()))
    }

    pub fn and(children: Vec<FilterExpression>) -> AppResult<Self> {
        if children.is_empty() {
            return Err(AppError::InvalidFilter(
                "AND filter requires at least one child".to_string(),
            ));
        }
        Ok(FilterExpression::And(children))
    }

    pub fn or(children: Vec<FilterExpression>) -> AppResult<Self> {
        if children.is_empty() {
            return Err(AppError::InvalidFilter(
                "OR filter requires at least one child".to_string(),
            ));
        }
        Ok(FilterExpression::Or(children))
    }

    pub fn negate(child: FilterExpression) -> Self {
        FilterExpression::Not(Box::new(child))
    }

    /// Re-check every node; needed for trees built directly from the variants
    pub fn validate(&self) -> AppResult<()> {
        match self {
            FilterExpression::Presence(attr)
            | FilterExpression::Equality(attr, _)
            | FilterExpression::Comparison(attr, _, _) => check_attribute(attr),
            FilterExpression::And(children) | FilterExpression::Or(children) => {
                if children.is_empty() {
                    return Err(AppError::InvalidFilter(format!(
                        "{} filter requires at least one child",
                        if matches!(self, FilterExpression::And(_)) {
                            "AND"
                        } else {
                            "OR"
                        }
                    )));
                }
                children.iter().try_for_each(|c| c.validate())
            }
            FilterExpression::Not(child) => child.validate(),
        }
    }

    /// Every attribute name referenced anywhere in the tree
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_attributes(&mut names);
        names
    }

    fn collect_attributes<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            FilterExpression::Presence(attr)
            | FilterExpression::Equality(attr, _)
            | FilterExpression::Comparison(attr, _, _) => {
                if !names.contains(&attr.as_str()) {
                    names.push(attr);
                }
            }
            FilterExpression::And(children) | FilterExpression::Or(children) => {
                for child in children {
                    child.collect_attributes(names);
                }
            }
            FilterExpression::Not(child) => child.collect_attributes(names),
        }
    }
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Stable LDAP-style rendering, used for logging and paging request fingerprints
impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Presence(attr) => write!(f, "({}=*)", attr),
            FilterExpression::Equality(attr, value) => {
                write!(f, "({}={})", attr, escape_value(value))
            }
            FilterExpression::Comparison(attr, op, value) => {
                let value = escape_value(value);
                match op {
                    CompareOp::GreaterThan => write!(f, "({}>{})", attr, value),
                    CompareOp::GreaterOrEqual => write!(f, "({}>={})", attr, value),
                    CompareOp::LessThan => write!(f, "({}<{})", attr, value),
                    CompareOp::LessOrEqual => write!(f, "({}<={})", attr, value),
                    CompareOp::StartsWith => write!(f, "({}={}*)", attr, value),
                    CompareOp::EndsWith => write!(f, "({}=*{})", attr, value),
                    CompareOp::Contains => write!(f, "({}=*{}*)", attr, value),
                }
            }
            FilterExpression::And(children) => {
                write!(f, "(&")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            FilterExpression::Or(children) => {
                write!(f, "(|")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            FilterExpression::Not(child) => write!(f, "(!{})", child),
        }
    }
}
