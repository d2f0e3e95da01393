//! Dirty-tracking attribute container for resource objects.
//!
//! Attributes form a tree: plain values at the leaves, nested [`Attributes`]
//! containers for object-typed fields. Every mutation is addressed by a
//! dotted path from the resource root, and dirt recorded at a leaf is
//! propagated to every container along the path, so the owning resource can
//! answer `is_dirty` and produce minimal PATCH payloads.

use ahash::AHashSet;
use serde_json::{Map, Value};

use crate::schema::Schema;

/// A single attribute entry: a scalar JSON value or a nested container.
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Plain JSON value (including raw objects assigned wholesale).
    Scalar(Value),
    /// Nested attribute object with its own dirty tracking.
    Object(Attributes),
}

impl AttrValue {
    /// The plain JSON form of this entry.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Scalar(value) => value.clone(),
            AttrValue::Object(attributes) => attributes.to_json(),
        }
    }
}

/// Ordered, schema-aware mapping of attribute names to values.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
    dirty: AHashSet<String>,
}

impl Attributes {
    /// Build a container from raw server data, reconciling against the
    /// schema when one governs this path.
    ///
    /// Declared plain fields are extracted (falling back to the spec's
    /// `default`), declared object fields become nested containers, and
    /// relationship fields are skipped (they live in the relationship map).
    /// Data not covered by the schema is kept as-is, with a warning when a
    /// schema was present; raw nested objects become containers either way.
    /// A freshly built container is fully clean.
    pub(crate) fn from_data(
        mut data: Map<String, Value>,
        resource_type: &str,
        prefix: &str,
        schema: &Schema,
    ) -> Attributes {
        let mut attributes = Attributes::default();
        let spec = schema
            .find_spec(resource_type, prefix)
            .and_then(|spec| spec.get("properties"))
            .and_then(Value::as_object)
            .cloned();
        if let Some(properties) = spec {
            for (field_name, field_spec) in &properties {
                if field_spec.get("type").and_then(Value::as_str) == Some("object") {
                    let field_data = match data.remove(field_name) {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    let child_prefix = join_path(prefix, field_name);
                    let child =
                        Attributes::from_data(field_data, resource_type, &child_prefix, schema);
                    attributes
                        .entries
                        .push((field_name.clone(), AttrValue::Object(child)));
                } else if field_spec.get("relation").is_some() {
                    // Relationships are handled by the relationship map.
                } else {
                    let value = data
                        .remove(field_name)
                        .or_else(|| field_spec.get("default").cloned())
                        .unwrap_or(Value::Null);
                    attributes
                        .entries
                        .push((field_name.clone(), AttrValue::Scalar(value)));
                }
            }
            if !data.is_empty() {
                log::warn!(
                    "attributes of `{resource_type}` contain data not declared in schema: {:?}",
                    data.keys().collect::<Vec<_>>()
                );
            }
        }
        for (name, value) in data {
            let entry = match value {
                Value::Object(map) => {
                    let child_prefix = join_path(prefix, &name);
                    AttrValue::Object(Attributes::from_data(
                        map,
                        resource_type,
                        &child_prefix,
                        schema,
                    ))
                }
                other => AttrValue::Scalar(other),
            };
            attributes.entries.push((name, entry));
        }
        attributes
    }

    fn entry(&self, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut AttrValue> {
        self.entries
            .iter_mut()
            .find(|(entry_name, _)| entry_name == name)
            .map(|(_, value)| value)
    }

    /// Look up an entry by dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&AttrValue> {
        match path.split_once('.') {
            Some((head, rest)) => match self.entry(head)? {
                AttrValue::Object(child) => child.get(rest),
                AttrValue::Scalar(_) => None,
            },
            None => self.entry(path),
        }
    }

    /// Look up a value by dotted path, in plain JSON form.
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.get(path).map(AttrValue::to_json)
    }

    /// Set the value at a dotted path, creating intermediate containers as
    /// needed. Returns whether anything changed; dirt is recorded only for
    /// actual changes, and propagated to every container on the path.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        match path.split_once('.') {
            Some((head, rest)) => {
                let needs_container = !matches!(self.entry(head), Some(AttrValue::Object(_)));
                if needs_container {
                    self.insert_entry(head.to_owned(), AttrValue::Object(Attributes::default()));
                    self.dirty.insert(head.to_owned());
                }
                let Some(AttrValue::Object(child)) = self.entry_mut(head) else {
                    unreachable!("container inserted above");
                };
                let changed = child.set(rest, value);
                if changed {
                    self.dirty.insert(head.to_owned());
                }
                changed
            }
            None => {
                if self.entry(path).map(AttrValue::to_json) == Some(value.clone()) {
                    return false;
                }
                self.insert_entry(path.to_owned(), AttrValue::Scalar(value));
                self.dirty.insert(path.to_owned());
                true
            }
        }
    }

    fn insert_entry(&mut self, name: String, value: AttrValue) {
        if let Some(existing) = self.entry_mut(&name) {
            *existing = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Insert an empty nested container under `name`, marking it dirty.
    pub fn create_map(&mut self, name: &str) {
        self.insert_entry(name.to_owned(), AttrValue::Object(Attributes::default()));
        self.dirty.insert(name.to_owned());
    }

    /// Whether any field in this subtree has changed since the last clean
    /// mark.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Names of directly dirty fields, in entry order.
    #[must_use]
    pub fn dirty_fields(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(name, _)| self.dirty.contains(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Mark this container and all nested containers clean.
    pub fn mark_clean(&mut self) {
        for (_, value) in &mut self.entries {
            if let AttrValue::Object(child) = value {
                child.mark_clean();
            }
        }
        self.dirty.clear();
    }

    /// The changed subtree only: the basis of PATCH payloads.
    ///
    /// A dirty nested container contributes its own diff; a dirty leaf (or a
    /// container that was replaced wholesale) contributes its full value.
    #[must_use]
    pub fn diff(&self) -> Map<String, Value> {
        let mut diff = Map::new();
        for (name, value) in &self.entries {
            if !self.dirty.contains(name) {
                continue;
            }
            let value = match value {
                AttrValue::Object(child) if child.is_dirty() => Value::Object(child.diff()),
                other => other.to_json(),
            };
            diff.insert(name.clone(), value);
        }
        diff
    }

    /// The full subtree with null-valued fields pruned: the basis of POST
    /// payloads. A nested container that prunes to nothing is omitted from
    /// its parent.
    #[must_use]
    pub fn post_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        for (name, value) in &self.entries {
            match value {
                AttrValue::Object(child) => {
                    let nested = child.post_data();
                    if !nested.is_empty() {
                        data.insert(name.clone(), Value::Object(nested));
                    }
                }
                AttrValue::Scalar(Value::Null) => {}
                AttrValue::Scalar(scalar) => {
                    data.insert(name.clone(), scalar.clone());
                }
            }
        }
        data
    }

    /// The whole subtree as plain JSON, in entry order.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }

    /// Field names in entry order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_owned()
    } else {
        format!("{prefix}.{name}")
    }
}
