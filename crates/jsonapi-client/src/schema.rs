//! Optional declarative models describing attribute and relationship shapes
//! per resource type.
//!
//! A schema is a JSON object mapping resource type names to JSON-Schema-like
//! model descriptions. Attribute validation is delegated to the `jsonschema`
//! crate; two extension keys describe relationships:
//!
//! ```json
//! {
//!     "articles": {
//!         "properties": {
//!             "title": {"type": "string"},
//!             "contact": {
//!                 "type": "object",
//!                 "properties": {"phone": {"type": "string"}}
//!             },
//!             "author": {"relation": "to-one", "resource": ["people"]},
//!             "comments": {"relation": "to-many", "resource": ["comments"]}
//!         }
//!     }
//! }
//! ```
//!
//! Absence of a model for a type disables validation and shape-enforcement
//! for that type entirely; the schema is optional, not mandatory.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Error;

/// Cardinality of a schema-declared relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `"relation": "to-one"`.
    ToOne,
    /// `"relation": "to-many"`.
    ToMany,
}

impl RelationKind {
    /// Parse the wire form (`"to-one"` / `"to-many"`).
    #[must_use]
    pub fn parse(value: &str) -> Option<RelationKind> {
        match value {
            "to-one" => Some(RelationKind::ToOne),
            "to-many" => Some(RelationKind::ToMany),
            _ => None,
        }
    }
}

/// Container for per-type model schemas.
pub struct Schema {
    types: AHashMap<String, Value>,
    validators: RwLock<AHashMap<String, Arc<jsonschema::Validator>>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("types", &self.types.keys())
            .finish_non_exhaustive()
    }
}

impl Default for Schema {
    fn default() -> Self {
        Schema::empty()
    }
}

impl Schema {
    /// A schema with no models; validation is disabled for every type.
    #[must_use]
    pub fn empty() -> Schema {
        Schema {
            types: AHashMap::new(),
            validators: RwLock::new(AHashMap::new()),
        }
    }

    /// Build a schema from a JSON object mapping resource type names to
    /// model schemas.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `data` is not a JSON object.
    pub fn new(data: Value) -> Result<Schema, Error> {
        match data {
            Value::Object(models) => Ok(Schema {
                types: models.into_iter().collect(),
                validators: RwLock::new(AHashMap::new()),
            }),
            _ => Err(Error::validation(
                "schema must be an object mapping resource types to models",
            )),
        }
    }

    /// Merge additional type models into the schema, replacing models for
    /// types that are already present.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `data` is not a JSON object.
    pub fn add_type_schema(&mut self, data: Value) -> Result<(), Error> {
        let Value::Object(models) = data else {
            return Err(Error::validation(
                "schema must be an object mapping resource types to models",
            ));
        };
        let mut validators = self.validators.write();
        for (name, model) in models {
            validators.remove(&name);
            self.types.insert(name, model);
        }
        Ok(())
    }

    /// Whether any model is registered at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.types.is_empty()
    }

    /// The model schema registered for `resource_type`, if any.
    #[must_use]
    pub fn schema_for_type(&self, resource_type: &str) -> Option<&Value> {
        self.types.get(resource_type)
    }

    /// Find the specification for a (possibly nested, dot-separated)
    /// attribute path of `resource_type`.
    ///
    /// An empty path yields the whole model. `meta` paths are schemaless by
    /// design and never have a specification. `None` means the path is not
    /// governed by any schema; callers treat it as free-form data.
    #[must_use]
    pub fn find_spec(&self, resource_type: &str, path: &str) -> Option<&Value> {
        if path == "meta" || path.ends_with(".meta") {
            return None;
        }
        let mut spec = self.schema_for_type(resource_type)?;
        if path.is_empty() {
            return Some(spec);
        }
        for segment in path.split('.') {
            spec = spec.get("properties")?.get(segment)?;
        }
        Some(spec)
    }

    /// The declared relation kind of a property specification, if it
    /// describes a relationship.
    #[must_use]
    pub fn relation_kind(spec: &Value) -> Option<RelationKind> {
        spec.get("relation")
            .and_then(Value::as_str)
            .and_then(RelationKind::parse)
    }

    /// The resource types a relationship specification accepts as targets.
    #[must_use]
    pub fn allowed_resource_types(spec: &Value) -> Vec<String> {
        spec.get("resource")
            .and_then(Value::as_array)
            .map(|types| {
                types
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validate `instance` against the model registered for
    /// `resource_type`. A type without a model always passes.
    ///
    /// # Errors
    ///
    /// Returns a validation error describing the first violated constraint.
    pub fn validate(&self, resource_type: &str, instance: &Value) -> Result<(), Error> {
        let Some(model) = self.types.get(resource_type) else {
            return Ok(());
        };
        let validator = {
            let validators = self.validators.read();
            validators.get(resource_type).cloned()
        };
        let validator = match validator {
            Some(validator) => validator,
            None => {
                let compiled = jsonschema::validator_for(model).map_err(|error| {
                    Error::validation(format!(
                        "invalid schema for `{resource_type}`: {error}"
                    ))
                })?;
                let compiled = Arc::new(compiled);
                self.validators
                    .write()
                    .insert(resource_type.to_owned(), Arc::clone(&compiled));
                compiled
            }
        };
        validator
            .validate(instance)
            .map_err(|error| Error::validation(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RelationKind, Schema};

    fn example() -> Schema {
        Schema::new(json!({
            "articles": {
                "properties": {
                    "title": {"type": "string"},
                    "contact": {
                        "type": "object",
                        "properties": {"phone": {"type": "string"}}
                    },
                    "author": {"relation": "to-one", "resource": ["people"]},
                }
            }
        }))
        .expect("valid schema")
    }

    #[test]
    fn find_spec_descends_properties() {
        let schema = example();
        assert!(schema.find_spec("articles", "").is_some());
        assert_eq!(
            schema.find_spec("articles", "title"),
            Some(&json!({"type": "string"}))
        );
        assert_eq!(
            schema.find_spec("articles", "contact.phone"),
            Some(&json!({"type": "string"}))
        );
        assert!(schema.find_spec("articles", "contact.missing").is_none());
        assert!(schema.find_spec("people", "").is_none());
    }

    #[test]
    fn meta_is_never_specified() {
        let schema = example();
        assert!(schema.find_spec("articles", "meta").is_none());
        assert!(schema.find_spec("articles", "contact.meta").is_none());
    }

    #[test]
    fn relationship_helpers() {
        let schema = example();
        let spec = schema.find_spec("articles", "author").expect("spec");
        assert_eq!(Schema::relation_kind(spec), Some(RelationKind::ToOne));
        assert_eq!(Schema::allowed_resource_types(spec), vec!["people"]);
        let title = schema.find_spec("articles", "title").expect("spec");
        assert_eq!(Schema::relation_kind(title), None);
    }

    #[test]
    fn validation_enforces_model() {
        let schema = example();
        assert!(schema
            .validate("articles", &json!({"title": "ok"}))
            .is_ok());
        assert!(schema
            .validate("articles", &json!({"title": 42}))
            .is_err());
        // No model registered: everything passes.
        assert!(schema.validate("people", &json!({"age": "wrong"})).is_ok());
    }

    #[test]
    fn add_type_schema_merges() {
        let mut schema = example();
        schema
            .add_type_schema(json!({
                "people": {"properties": {"name": {"type": "string"}}}
            }))
            .expect("valid schema");
        assert!(schema.schema_for_type("people").is_some());
        assert!(schema.validate("people", &json!({"name": 1})).is_err());
    }

    #[test]
    fn rejects_non_object() {
        assert!(Schema::new(json!([1, 2])).is_err());
    }
}
