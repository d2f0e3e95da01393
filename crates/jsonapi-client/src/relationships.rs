//! Named relations between resources.
//!
//! A relationship payload carries at least one of `data`, `links` or `meta`.
//! The concrete shape is decided once, at parse time, from the payload
//! itself (with the schema's declared relation kind as a fallback); the
//! server payload wins over a conflicting schema hint.

use serde_json::Value;

use crate::{
    document::Document,
    error::Error,
    objects::{Links, Meta, ResourceIdentifier},
    resource::ResourceObject,
    schema::RelationKind,
    session::Session,
};

/// The data shape of a relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipData {
    /// Zero or one target resource.
    ToOne(Option<ResourceIdentifier>),
    /// An ordered sequence of target resources.
    ToMany(Vec<ResourceIdentifier>),
    /// No inline data; targets are resolved by following the relationship
    /// links.
    Links,
    /// Meta information only.
    Meta,
}

/// A named relation on a resource: target identifiers (per
/// [`RelationshipData`] shape), optional links and meta, a dirty flag, and
/// the set of resource types the schema allows as targets.
#[derive(Debug, Clone)]
pub struct Relationship {
    data: RelationshipData,
    links: Links,
    meta: Meta,
    allowed_types: Vec<String>,
    dirty: bool,
}

/// A value accepted by [`Relationship::set`] and by relationship fields of
/// [`Session::create`].
#[derive(Debug, Clone)]
pub enum RelationshipValue {
    /// Clear a to-one relationship.
    None,
    /// A plain id; the resource type is taken from the schema, which must
    /// allow exactly one.
    Id(String),
    /// A fully typed identifier.
    Identifier(ResourceIdentifier),
    /// A sequence of plain ids.
    Ids(Vec<String>),
    /// A sequence of typed identifiers.
    Identifiers(Vec<ResourceIdentifier>),
}

impl From<&str> for RelationshipValue {
    fn from(id: &str) -> RelationshipValue {
        RelationshipValue::Id(id.to_owned())
    }
}

impl From<String> for RelationshipValue {
    fn from(id: String) -> RelationshipValue {
        RelationshipValue::Id(id)
    }
}

impl From<ResourceIdentifier> for RelationshipValue {
    fn from(identifier: ResourceIdentifier) -> RelationshipValue {
        RelationshipValue::Identifier(identifier)
    }
}

impl From<&ResourceObject> for RelationshipValue {
    fn from(resource: &ResourceObject) -> RelationshipValue {
        RelationshipValue::Identifier(resource.identifier())
    }
}

impl From<Vec<ResourceIdentifier>> for RelationshipValue {
    fn from(identifiers: Vec<ResourceIdentifier>) -> RelationshipValue {
        RelationshipValue::Identifiers(identifiers)
    }
}

impl From<Vec<&str>> for RelationshipValue {
    fn from(ids: Vec<&str>) -> RelationshipValue {
        RelationshipValue::Ids(ids.into_iter().map(str::to_owned).collect())
    }
}

impl From<Vec<String>> for RelationshipValue {
    fn from(ids: Vec<String>) -> RelationshipValue {
        RelationshipValue::Ids(ids)
    }
}

impl RelationshipValue {
    /// Interpret a plain JSON value as a relationship target: `null` clears,
    /// a string is a plain id, an object is a typed identifier, an array is
    /// a sequence of either.
    ///
    /// # Errors
    ///
    /// Fails on numbers, booleans, malformed identifier objects, and arrays
    /// mixing strings with identifier objects.
    pub fn from_json(value: Value) -> Result<RelationshipValue, Error> {
        match value {
            Value::Null => Ok(RelationshipValue::None),
            Value::String(id) => Ok(RelationshipValue::Id(id)),
            Value::Object(_) => Ok(RelationshipValue::Identifier(parse_identifier(&value)?)),
            Value::Array(items) => {
                let mut ids = Vec::new();
                let mut identifiers = Vec::new();
                for item in &items {
                    match item {
                        Value::String(id) => ids.push(id.clone()),
                        Value::Object(_) => identifiers.push(parse_identifier(item)?),
                        _ => {
                            return Err(Error::validation(
                                "relationship array items must be ids or identifiers",
                            ))
                        }
                    }
                }
                match (ids.is_empty(), identifiers.is_empty()) {
                    (true, _) => Ok(RelationshipValue::Identifiers(identifiers)),
                    (false, true) => Ok(RelationshipValue::Ids(ids)),
                    (false, false) => Err(Error::validation(
                        "relationship array cannot mix ids and identifiers",
                    )),
                }
            }
            _ => Err(Error::validation(
                "relationship value must be null, an id, an identifier or an array",
            )),
        }
    }
}

impl Relationship {
    /// Classify and parse a raw relationship payload.
    ///
    /// Precedence: a `data` key decides the shape (array → to-many, object
    /// or null → to-one); else `links`, else `meta`, else the schema's
    /// declared relation kind; a payload with none of these is invalid. A
    /// conflict between the payload shape and the schema hint is logged and
    /// the payload wins.
    pub(crate) fn from_payload(
        name: &str,
        payload: &Value,
        hint: Option<RelationKind>,
        allowed_types: Vec<String>,
    ) -> Result<Relationship, Error> {
        let Value::Object(map) = payload else {
            return Err(Error::validation(format!(
                "relationship `{name}` must be an object"
            )));
        };
        let links = Links::from_value(map.get("links"));
        let meta = Meta::from_value(map.get("meta"));
        let data = if let Some(data) = map.get("data") {
            match data {
                Value::Array(items) => {
                    if hint == Some(RelationKind::ToOne) {
                        log::warn!("conflicting information about relationship `{name}`");
                    }
                    let identifiers = items
                        .iter()
                        .map(parse_identifier)
                        .collect::<Result<Vec<_>, _>>()?;
                    RelationshipData::ToMany(identifiers)
                }
                Value::Null => {
                    if hint == Some(RelationKind::ToMany) {
                        log::warn!("conflicting information about relationship `{name}`");
                    }
                    RelationshipData::ToOne(None)
                }
                Value::Object(_) => {
                    if hint == Some(RelationKind::ToMany) {
                        log::warn!("conflicting information about relationship `{name}`");
                    }
                    RelationshipData::ToOne(Some(parse_identifier(data)?))
                }
                _ => {
                    return Err(Error::validation(format!(
                        "relationship `{name}` data is invalid"
                    )))
                }
            }
        } else if map.contains_key("links") {
            RelationshipData::Links
        } else if map.contains_key("meta") {
            RelationshipData::Meta
        } else {
            match hint {
                Some(RelationKind::ToMany) => RelationshipData::ToMany(Vec::new()),
                Some(RelationKind::ToOne) => RelationshipData::ToOne(None),
                None => {
                    return Err(Error::validation(format!(
                        "relationship `{name}` must have one of data, links or meta"
                    )))
                }
            }
        };
        Ok(Relationship {
            data,
            links,
            meta,
            allowed_types,
            dirty: false,
        })
    }

    /// Build an empty relationship of the given kind (used when assembling
    /// unsaved resources from schema-declared relations).
    pub(crate) fn empty(kind: RelationKind, allowed_types: Vec<String>) -> Relationship {
        let data = match kind {
            RelationKind::ToOne => RelationshipData::ToOne(None),
            RelationKind::ToMany => RelationshipData::ToMany(Vec::new()),
        };
        Relationship {
            data,
            links: Links::default(),
            meta: Meta::default(),
            allowed_types,
            dirty: false,
        }
    }

    /// The data shape and target identifiers.
    #[must_use]
    pub fn data(&self) -> &RelationshipData {
        &self.data
    }

    /// The target identifier of a to-one relationship.
    #[must_use]
    pub fn identifier(&self) -> Option<&ResourceIdentifier> {
        match &self.data {
            RelationshipData::ToOne(identifier) => identifier.as_ref(),
            _ => None,
        }
    }

    /// The target identifiers of a to-many relationship, in document order.
    #[must_use]
    pub fn identifiers(&self) -> &[ResourceIdentifier] {
        match &self.data {
            RelationshipData::ToMany(identifiers) => identifiers,
            _ => &[],
        }
    }

    /// Relationship-level links.
    #[must_use]
    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Relationship-level meta.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Whether this relationship has been mutated since the last clean mark.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Whether the relationship has no target identifiers to serialize.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.data {
            RelationshipData::ToOne(identifier) => identifier.is_none(),
            RelationshipData::ToMany(identifiers) => identifiers.is_empty(),
            RelationshipData::Links | RelationshipData::Meta => true,
        }
    }

    /// The `data` member for commit payloads; `None` for links-only and
    /// meta-only relationships, which have nothing to write back.
    #[must_use]
    pub fn as_data(&self) -> Option<Value> {
        match &self.data {
            RelationshipData::ToOne(identifier) => Some(
                identifier
                    .as_ref()
                    .map_or(Value::Null, ResourceIdentifier::to_data),
            ),
            RelationshipData::ToMany(identifiers) => Some(Value::Array(
                identifiers.iter().map(ResourceIdentifier::to_data).collect(),
            )),
            RelationshipData::Links | RelationshipData::Meta => None,
        }
    }

    /// Set the relationship target(s), validating the resource type of every
    /// target against the schema's allowed set and marking the relationship
    /// dirty.
    ///
    /// # Errors
    ///
    /// Fails when a target's resource type is not allowed, when a plain id
    /// is given but the allowed set does not pin down exactly one type, or
    /// when the relationship is links-only or meta-only.
    pub fn set(&mut self, value: impl Into<RelationshipValue>) -> Result<(), Error> {
        match &self.data {
            RelationshipData::ToOne(_) => {
                let identifier = match value.into() {
                    RelationshipValue::None => None,
                    RelationshipValue::Id(id) => Some(self.coerce_plain_id(id)?),
                    RelationshipValue::Identifier(identifier) => {
                        Some(self.check_type(identifier)?)
                    }
                    RelationshipValue::Ids(_) | RelationshipValue::Identifiers(_) => {
                        return Err(Error::validation(
                            "a to-one relationship takes a single identifier",
                        ))
                    }
                };
                self.data = RelationshipData::ToOne(identifier);
            }
            RelationshipData::ToMany(_) => {
                let identifiers = match value.into() {
                    RelationshipValue::None => Vec::new(),
                    RelationshipValue::Id(id) => vec![self.coerce_plain_id(id)?],
                    RelationshipValue::Identifier(identifier) => {
                        vec![self.check_type(identifier)?]
                    }
                    RelationshipValue::Ids(ids) => ids
                        .into_iter()
                        .map(|id| self.coerce_plain_id(id))
                        .collect::<Result<_, _>>()?,
                    RelationshipValue::Identifiers(identifiers) => identifiers
                        .into_iter()
                        .map(|identifier| self.check_type(identifier))
                        .collect::<Result<_, _>>()?,
                };
                self.data = RelationshipData::ToMany(identifiers);
            }
            RelationshipData::Links | RelationshipData::Meta => {
                return Err(Error::validation(
                    "cannot assign targets to a links-only or meta-only relationship",
                ))
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn coerce_plain_id(&self, id: String) -> Result<ResourceIdentifier, Error> {
        if let [resource_type] = self.allowed_types.as_slice() {
            Ok(ResourceIdentifier::new(resource_type.clone(), id))
        } else {
            Err(Error::validation(
                "use a typed identifier when the schema allows more than one resource type",
            ))
        }
    }

    fn check_type(&self, identifier: ResourceIdentifier) -> Result<ResourceIdentifier, Error> {
        if !self.allowed_types.is_empty()
            && !self.allowed_types.contains(&identifier.resource_type)
        {
            return Err(Error::validation(format!(
                "invalid resource type `{}`, should be one of {:?}",
                identifier.resource_type, self.allowed_types
            )));
        }
        Ok(identifier)
    }

    /// Resolve the target of a to-one relationship to a live resource,
    /// through the session cache.
    ///
    /// Links-only relationships resolve by fetching the `related` (or
    /// `self`) link.
    ///
    /// # Errors
    ///
    /// Fails on fetch errors or when called on a to-many or meta-only
    /// relationship.
    pub fn resource(&self, session: &Session) -> Result<Option<ResourceObject>, Error> {
        match &self.data {
            RelationshipData::ToOne(Some(identifier)) => {
                session.fetch_resource_by_identifier(identifier, false, false)
            }
            RelationshipData::ToOne(None) => Ok(None),
            RelationshipData::Links => Ok(self.fetch_linked(session)?.resource()?),
            _ => Err(Error::validation("not a to-one relationship")),
        }
    }

    /// Async form of [`resource`](Relationship::resource).
    ///
    /// # Errors
    ///
    /// See [`resource`](Relationship::resource).
    pub async fn resource_async(
        &self,
        session: &Session,
    ) -> Result<Option<ResourceObject>, Error> {
        match &self.data {
            RelationshipData::ToOne(Some(identifier)) => {
                session
                    .fetch_resource_by_identifier_async(identifier, false, false)
                    .await
            }
            RelationshipData::ToOne(None) => Ok(None),
            RelationshipData::Links => Ok(self.fetch_linked_async(session).await?.resource()?),
            _ => Err(Error::validation("not a to-one relationship")),
        }
    }

    /// Resolve all targets of this relationship to live resources, through
    /// the session cache.
    ///
    /// # Errors
    ///
    /// Fails on fetch errors or when called on a meta-only relationship.
    pub fn resources(&self, session: &Session) -> Result<Vec<ResourceObject>, Error> {
        match &self.data {
            RelationshipData::ToMany(identifiers) => identifiers
                .iter()
                .filter_map(|identifier| {
                    session
                        .fetch_resource_by_identifier(identifier, false, false)
                        .transpose()
                })
                .collect(),
            RelationshipData::ToOne(_) => Ok(self.resource(session)?.into_iter().collect()),
            RelationshipData::Links => self.fetch_linked(session)?.resources(),
            RelationshipData::Meta => {
                Err(Error::validation("a meta-only relationship has no resources"))
            }
        }
    }

    /// Async form of [`resources`](Relationship::resources).
    ///
    /// # Errors
    ///
    /// See [`resources`](Relationship::resources).
    pub async fn resources_async(&self, session: &Session) -> Result<Vec<ResourceObject>, Error> {
        match &self.data {
            RelationshipData::ToMany(identifiers) => {
                let mut resources = Vec::with_capacity(identifiers.len());
                for identifier in identifiers {
                    if let Some(resource) = session
                        .fetch_resource_by_identifier_async(identifier, false, false)
                        .await?
                    {
                        resources.push(resource);
                    }
                }
                Ok(resources)
            }
            RelationshipData::ToOne(_) => {
                Ok(self.resource_async(session).await?.into_iter().collect())
            }
            RelationshipData::Links => self.fetch_linked_async(session).await?.resources(),
            RelationshipData::Meta => {
                Err(Error::validation("a meta-only relationship has no resources"))
            }
        }
    }

    fn linked_url(&self, session: &Session) -> Result<String, Error> {
        self.links
            .related()
            .or_else(|| self.links.self_link())
            .map(|link| link.url(session))
            .ok_or_else(|| Error::validation("relationship has no followable link"))
    }

    fn fetch_linked(&self, session: &Session) -> Result<Document, Error> {
        let url = self.linked_url(session)?;
        session.fetch_document_by_url(&url)
    }

    async fn fetch_linked_async(&self, session: &Session) -> Result<Document, Error> {
        let url = self.linked_url(session)?;
        session.fetch_document_by_url_async(&url).await
    }
}

fn parse_identifier(value: &Value) -> Result<ResourceIdentifier, Error> {
    serde_json::from_value(value.clone())
        .map_err(|error| Error::validation(format!("invalid resource identifier: {error}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Relationship, RelationshipData, RelationshipValue};
    use crate::{objects::ResourceIdentifier, schema::RelationKind};

    fn parse(payload: serde_json::Value, hint: Option<RelationKind>) -> Relationship {
        Relationship::from_payload("example", &payload, hint, Vec::new()).expect("valid payload")
    }

    #[test]
    fn data_array_is_to_many() {
        let relationship = parse(json!({"data": [{"id": "1", "type": "comments"}]}), None);
        assert_eq!(
            relationship.identifiers(),
            &[ResourceIdentifier::new("comments", "1")]
        );
    }

    #[test]
    fn data_array_wins_over_to_one_hint() {
        // Server payload wins; the conflict is logged, not fatal.
        let relationship = parse(
            json!({"data": [{"id": "1", "type": "comments"}]}),
            Some(RelationKind::ToOne),
        );
        assert!(matches!(
            relationship.data(),
            RelationshipData::ToMany(identifiers) if identifiers.len() == 1
        ));
    }

    #[test]
    fn data_object_and_null_are_to_one() {
        let relationship = parse(json!({"data": {"id": "9", "type": "people"}}), None);
        assert_eq!(
            relationship.identifier(),
            Some(&ResourceIdentifier::new("people", "9"))
        );
        let empty = parse(json!({"data": null}), None);
        assert_eq!(empty.identifier(), None);
        assert!(empty.is_empty());
    }

    #[test]
    fn links_only_and_meta_only() {
        let linked = parse(json!({"links": {"related": "/articles/1/author"}}), None);
        assert_eq!(linked.data(), &RelationshipData::Links);
        assert!(linked.links().related().is_some());

        let meta = parse(json!({"meta": {"count": 10}}), None);
        assert_eq!(meta.data(), &RelationshipData::Meta);
        assert_eq!(meta.meta().get("count"), Some(&json!(10)));
    }

    #[test]
    fn schema_hint_fallback() {
        let to_many = parse(json!({}), Some(RelationKind::ToMany));
        assert_eq!(to_many.data(), &RelationshipData::ToMany(Vec::new()));
        let to_one = parse(json!({}), Some(RelationKind::ToOne));
        assert_eq!(to_one.data(), &RelationshipData::ToOne(None));
    }

    #[test]
    fn invalid_payloads() {
        assert!(Relationship::from_payload("r", &json!({"data": 42}), None, Vec::new()).is_err());
        assert!(Relationship::from_payload("r", &json!({}), None, Vec::new()).is_err());
        assert!(Relationship::from_payload("r", &json!("nope"), None, Vec::new()).is_err());
    }

    #[test]
    fn set_validates_resource_type() {
        let mut relationship = Relationship::empty(RelationKind::ToOne, vec!["people".into()]);
        assert!(relationship
            .set(ResourceIdentifier::new("comments", "1"))
            .is_err());
        assert!(relationship.set(ResourceIdentifier::new("people", "1")).is_ok());
        assert!(relationship.is_dirty());
        assert_eq!(
            relationship.as_data(),
            Some(json!({"id": "1", "type": "people"}))
        );
    }

    #[test]
    fn plain_id_needs_unambiguous_type() {
        let mut single = Relationship::empty(RelationKind::ToOne, vec!["people".into()]);
        assert!(single.set("7").is_ok());
        assert_eq!(single.identifier(), Some(&ResourceIdentifier::new("people", "7")));

        let mut ambiguous = Relationship::empty(
            RelationKind::ToOne,
            vec!["people".into(), "robots".into()],
        );
        assert!(ambiguous.set("7").is_err());
    }

    #[test]
    fn clearing_a_to_one() {
        let mut relationship = Relationship::empty(RelationKind::ToOne, vec!["people".into()]);
        relationship.set("7").expect("valid id");
        relationship.set(RelationshipValue::None).expect("clearable");
        assert!(relationship.is_empty());
        assert_eq!(relationship.as_data(), Some(json!(null)));
    }

    #[test]
    fn to_many_set_and_payload() {
        let mut relationship = Relationship::empty(RelationKind::ToMany, vec!["comments".into()]);
        relationship.set(vec!["1", "2"]).expect("valid ids");
        assert_eq!(
            relationship.as_data(),
            Some(json!([
                {"id": "1", "type": "comments"},
                {"id": "2", "type": "comments"},
            ]))
        );
    }

    #[test]
    fn set_rejected_on_links_only() {
        let mut relationship = parse(json!({"links": {"related": "/x"}}), None);
        assert!(relationship.set("1").is_err());
        assert!(!relationship.is_dirty());
    }
}
