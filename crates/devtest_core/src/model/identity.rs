//! Explicit entity-type -> identity-field mapping.
//!
//! Repositories receive an `IdentityMap` at construction and only consult it
//! on the audit update path. A type without a usable entry resolves to
//! nothing, which the audit path reports as `FieldNotFound`.

use std::collections::HashMap;

const CATEGORY_DELIMITER: char = '_';
const CATEGORY_MIN_SEGMENTS: usize = 3;
const IDENTITY_SUFFIX: &str = "Id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    fields: HashMap<String, String>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`IdentityMap::register`].
    pub fn with(mut self, type_name: &str, field: impl Into<String>) -> Self {
        self.register(type_name, field);
        self
    }

    pub fn register(&mut self, type_name: &str, field: impl Into<String>) {
        self.fields.insert(type_name.to_string(), field.into());
    }

    /// Registers `type_name` using the legacy table-category naming scheme.
    ///
    /// Returns the registered field, or `None` when `category` does not follow
    /// the scheme (nothing is registered in that case).
    pub fn register_by_convention(&mut self, type_name: &str, category: &str) -> Option<&str> {
        let field = identity_field_by_convention(category)?;
        self.fields.insert(type_name.to_string(), field);
        self.resolve(type_name)
    }

    /// Returns the identity field for `type_name`; empty registrations count as missing.
    pub fn resolve(&self, type_name: &str) -> Option<&str> {
        self.fields
            .get(type_name)
            .map(String::as_str)
            .filter(|field| !field.is_empty())
    }
}

/// Derives an identity field name from a category name such as `OL_CM_Campaign`.
///
/// The first two `_`-separated segments are prefixes; the remaining segments
/// are concatenated and suffixed with `Id` (`OL_CM_Group_Panel` -> `GroupPanelId`).
/// Fewer than three segments yields `None`.
pub fn identity_field_by_convention(category: &str) -> Option<String> {
    let segments: Vec<&str> = category.split(CATEGORY_DELIMITER).collect();
    if segments.len() < CATEGORY_MIN_SEGMENTS {
        return None;
    }

    let mut field = segments[2..].concat();
    field.push_str(IDENTITY_SUFFIX);
    Some(field)
}
