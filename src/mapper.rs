//! Explicit entity descriptors
//!
//! An entity type declares its object class and attribute mappings once, in a
//! `static` [`EntityDescriptor`], and implements [`EntryMapper`] to convert
//! between itself and [`RawEntry`].

use crate::error::{AppError, AppResult};
use crate::filter::FilterExpression;
use crate::models::RawEntry;

pub const OBJECT_CLASS: &str = "objectClass";

/// One entity field stored under a directory attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeMapping {
    pub field: &'static str,
    pub attribute: &'static str,
    pub multi_valued: bool,
}

impl AttributeMapping {
    pub const fn single(field: &'static str, attribute: &'static str) -> Self {
        Self {
            field,
            attribute,
            multi_valued: false,
        }
    }

    pub const fn multi(field: &'static str, attribute: &'static str) -> Self {
        Self {
            field,
            attribute,
            multi_valued: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub object_class: &'static str,
    pub attributes: &'static [AttributeMapping],
}

impl EntityDescriptor {
    /// Attributes to request when reading this entity, object class included
    pub fn attribute_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .iter()
            .map(|m| m.attribute.to_string())
            .collect();
        if !names.iter().any(|n| n == OBJECT_CLASS) {
            names.push(OBJECT_CLASS.to_string());
        }
        names
    }

    pub fn mapping(&self, field: &str) -> Option<&AttributeMapping> {
        self.attributes.iter().find(|m| m.field == field)
    }

    pub fn object_class_filter(&self) -> FilterExpression {
        FilterExpression::Equality(OBJECT_CLASS.to_string(), self.object_class.to_string())
    }

    /// Restrict `filter` to entries of this object class
    pub fn restrict(&self, filter: FilterExpression) -> FilterExpression {
        match filter {
            FilterExpression::And(mut children) => {
                children.insert(0, self.object_class_filter());
                FilterExpression::And(children)
            }
            other => FilterExpression::And(vec![self.object_class_filter(), other]),
        }
    }

    /// True when the entry carries this descriptor's object class, spelled
    /// exactly as declared so lookups agree with [`restrict`](Self::restrict)
    pub fn describes(&self, entry: &RawEntry) -> bool {
        entry
            .values(OBJECT_CLASS)
            .map(|classes| classes.iter().any(|c| c == self.object_class))
            .unwrap_or(false)
    }

    /// Rewrite any case variant of the object class to the declared spelling,
    /// adding it when absent
    pub fn canonicalize(&self, entry: &mut RawEntry) {
        let classes = entry.attributes.entry(OBJECT_CLASS.to_string()).or_default();
        classes.retain(|c| !c.eq_ignore_ascii_case(self.object_class));
        classes.push(self.object_class.to_string());
    }
}

/// Converts one entity type to and from raw entries
pub trait EntryMapper: Send + Sync {
    type Entity: Send;

    fn descriptor(&self) -> &'static EntityDescriptor;

    fn encode(&self, entity: &Self::Entity) -> AppResult<RawEntry>;

    fn decode(&self, entry: RawEntry) -> AppResult<Self::Entity>;

    fn attribute_names(&self) -> Vec<String> {
        self.descriptor().attribute_names()
    }
}

/// Single value of a mandatory attribute
pub fn required_value<'a>(entry: &'a RawEntry, attribute: &str) -> AppResult<&'a str> {
    entry.first_value(attribute).ok_or_else(|| {
        AppError::InvalidRequest(format!(
            "Entry {} has no value for required attribute {}",
            entry.dn, attribute
        ))
    })
}
