//! The central entity: a JSON:API resource object.
//!
//! <https://jsonapi.org/format/1.0/#document-resource-objects>

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::{Map, Value};

use crate::{
    attributes::Attributes,
    error::Error,
    http::{self, HttpMethod, HttpResponse},
    names::wire_name,
    objects::{Links, Meta, ResourceIdentifier},
    relationships::{Relationship, RelationshipValue},
    schema::Schema,
    session::Session,
};

/// A resolved field of a resource: either an attribute value or a
/// relationship.
#[derive(Debug, Clone)]
pub enum ResourceField {
    /// An attribute value, in plain JSON form.
    Attribute(Value),
    /// A relationship snapshot.
    Relationship(Relationship),
}

struct ResourceState {
    resource_type: String,
    id: Option<String>,
    attributes: Attributes,
    relationships: Vec<(String, Relationship)>,
    links: Links,
    meta: Meta,
    commit_meta: Option<Value>,
    pending_delete: bool,
    invalid: bool,
}

/// A cached, shared handle to one resource.
///
/// Cloning is cheap and clones refer to the same underlying state, so a
/// resource obtained from the session cache stays valid across refreshes and
/// commits: successful writes replace the state in place, and every clone
/// observes the update. Identity can be checked with
/// [`ptr_eq`](ResourceObject::ptr_eq).
///
/// A resource is *dirty* when it has no server-assigned id yet, is marked
/// for deletion, or any attribute or relationship changed since the last
/// clean mark. After [`Session::invalidate`] or a committed deletion all
/// field access fails with [`Error::InvalidState`].
#[derive(Clone)]
pub struct ResourceObject {
    inner: Arc<RwLock<ResourceState>>,
}

impl ResourceObject {
    /// Parse a resource object from raw document data.
    ///
    /// Resources with a server-assigned id are validated against the schema
    /// immediately; unsaved resources are validated at commit time instead.
    pub(crate) fn from_data(schema: &Schema, data: &Value) -> Result<ResourceObject, Error> {
        let Value::Object(map) = data else {
            return Err(Error::validation("resource object must be an object"));
        };
        let resource_type = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("resource object must have a type"))?
            .to_owned();
        let id = map.get("id").and_then(Value::as_str).map(str::to_owned);
        let attributes_data = match map.get("attributes") {
            Some(Value::Object(attributes)) => attributes.clone(),
            _ => Map::new(),
        };
        let attributes = Attributes::from_data(attributes_data, &resource_type, "", schema);
        let relationships =
            parse_relationships(schema, &resource_type, map.get("relationships"))?;
        let state = ResourceState {
            resource_type,
            id,
            attributes,
            relationships,
            links: Links::from_value(map.get("links")),
            meta: Meta::from_value(map.get("meta")),
            commit_meta: None,
            pending_delete: false,
            invalid: false,
        };
        let resource = ResourceObject {
            inner: Arc::new(RwLock::new(state)),
        };
        if resource.id().is_some() {
            resource.validate(schema)?;
        }
        Ok(resource)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ResourceState>, Error> {
        let state = self.inner.read();
        if state.invalid {
            return Err(Error::InvalidState);
        }
        Ok(state)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ResourceState>, Error> {
        let state = self.inner.write();
        if state.invalid {
            return Err(Error::InvalidState);
        }
        Ok(state)
    }

    /// Whether two handles refer to the same underlying resource state.
    #[must_use]
    pub fn ptr_eq(a: &ResourceObject, b: &ResourceObject) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The resource type name.
    ///
    /// Identity stays readable on invalidated resources; only field access
    /// is guarded.
    #[must_use]
    pub fn resource_type(&self) -> String {
        self.inner.read().resource_type.clone()
    }

    /// The server-assigned id; `None` until the first successful commit.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        self.inner.read().id.clone()
    }

    /// The `{type, id}` identifier of this resource.
    #[must_use]
    pub fn identifier(&self) -> ResourceIdentifier {
        let state = self.inner.read();
        ResourceIdentifier {
            resource_type: state.resource_type.clone(),
            id: state.id.clone(),
        }
    }

    /// Resource-level links.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn links(&self) -> Result<Links, Error> {
        Ok(self.read()?.links.clone())
    }

    /// Resource-level meta.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn meta(&self) -> Result<Meta, Error> {
        Ok(self.read()?.meta.clone())
    }

    /// Read an attribute by local or wire name (dotted/underscored paths
    /// address nested attributes).
    ///
    /// # Errors
    ///
    /// Fails with an unknown-field error when no such attribute exists, or
    /// with an invalid-state error after invalidation.
    pub fn attr(&self, name: &str) -> Result<Value, Error> {
        let state = self.read()?;
        let path = wire_name(name);
        state
            .attributes
            .get_value(&path)
            .ok_or_else(|| Error::UnknownField {
                resource_type: state.resource_type.clone(),
                field: path,
            })
    }

    /// Write an attribute by local or wire name, creating nested containers
    /// for dotted paths as needed. Writing an unchanged value leaves the
    /// resource clean.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-state error after invalidation.
    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let mut state = self.write()?;
        let path = wire_name(name);
        state.attributes.set(&path, value.into());
        Ok(())
    }

    /// Insert an empty nested attribute object under `name`.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-state error after invalidation.
    pub fn create_map(&self, name: &str) -> Result<(), Error> {
        let mut state = self.write()?;
        let path = wire_name(name);
        state.attributes.create_map(&path);
        Ok(())
    }

    /// A snapshot of the named relationship.
    ///
    /// # Errors
    ///
    /// Fails with an unknown-field error when no such relationship exists.
    pub fn relationship(&self, name: &str) -> Result<Relationship, Error> {
        let state = self.read()?;
        let name = wire_name(name);
        state
            .relationships
            .iter()
            .find(|(relationship_name, _)| *relationship_name == name)
            .map(|(_, relationship)| relationship.clone())
            .ok_or_else(|| Error::UnknownField {
                resource_type: state.resource_type.clone(),
                field: name,
            })
    }

    /// Assign the named relationship's target(s), validating target types
    /// against the schema and marking the relationship (and so the
    /// resource) dirty.
    ///
    /// # Errors
    ///
    /// Fails on unknown relationships, disallowed target types, ambiguous
    /// plain ids, and invalidated resources.
    pub fn set_relationship(
        &self,
        name: &str,
        value: impl Into<RelationshipValue>,
    ) -> Result<(), Error> {
        let mut state = self.write()?;
        let name = wire_name(name);
        let resource_type = state.resource_type.clone();
        let relationship = state
            .relationships
            .iter_mut()
            .find(|(relationship_name, _)| *relationship_name == name)
            .map(|(_, relationship)| relationship)
            .ok_or(Error::UnknownField {
                resource_type,
                field: name,
            })?;
        relationship.set(value)
    }

    /// Unified field read: attributes first, then relationships.
    ///
    /// # Errors
    ///
    /// Fails with an unknown-field error when the name matches neither an
    /// attribute nor a relationship.
    pub fn field(&self, name: &str) -> Result<ResourceField, Error> {
        let state = self.read()?;
        let path = wire_name(name);
        if let Some(value) = state.attributes.get_value(&path) {
            return Ok(ResourceField::Attribute(value));
        }
        state
            .relationships
            .iter()
            .find(|(relationship_name, _)| *relationship_name == path)
            .map(|(_, relationship)| ResourceField::Relationship(relationship.clone()))
            .ok_or_else(|| Error::UnknownField {
                resource_type: state.resource_type.clone(),
                field: path,
            })
    }

    /// Unified field write: names matching a relationship assign its
    /// targets; everything else is an attribute write.
    ///
    /// # Errors
    ///
    /// Fails on invalid relationship values, disallowed target types, and
    /// invalidated resources.
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let path = wire_name(name);
        let is_relationship = {
            let state = self.read()?;
            state
                .relationships
                .iter()
                .any(|(relationship_name, _)| *relationship_name == path)
        };
        if is_relationship {
            self.set_relationship(&path, RelationshipValue::from_json(value.into())?)
        } else {
            self.set_attr(&path, value)
        }
    }

    /// Attribute names in document order (wire form).
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn attribute_names(&self) -> Result<Vec<String>, Error> {
        Ok(self.read()?.attributes.keys().map(str::to_owned).collect())
    }

    /// Relationship names in document order (wire form).
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn relationship_names(&self) -> Result<Vec<String>, Error> {
        Ok(self
            .read()?
            .relationships
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    /// Whether this resource needs a commit: it has no id yet, is marked
    /// for deletion, or carries attribute/relationship changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let state = self.inner.read();
        state.id.is_none()
            || state.pending_delete
            || state.attributes.is_dirty()
            || state
                .relationships
                .iter()
                .any(|(_, relationship)| relationship.is_dirty())
    }

    /// Names of changed attributes and relationships.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn dirty_fields(&self) -> Result<Vec<String>, Error> {
        let state = self.read()?;
        let mut fields = state.attributes.dirty_fields();
        fields.extend(
            state
                .relationships
                .iter()
                .filter(|(_, relationship)| relationship.is_dirty())
                .map(|(name, _)| name.clone()),
        );
        Ok(fields)
    }

    /// The full JSON:API resource object for this resource, as it would be
    /// sent on creation.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn to_json(&self) -> Result<Value, Error> {
        let state = self.read()?;
        let payload = commit_payload(&state, true, None);
        Ok(payload["data"].clone())
    }

    /// The resource's own URL: its `self` link when present, else derived
    /// from the server base URL, type and id. `None` for unsaved resources
    /// without a `self` link.
    #[must_use]
    pub fn url(&self, session: &Session) -> Option<String> {
        let state = self.inner.read();
        if let Some(link) = state.links.self_link() {
            return Some(link.url(session));
        }
        state.id.as_ref().map(|id| {
            format!("{}/{}/{id}", session.url_prefix(), state.resource_type)
        })
    }

    /// The collection URL used when creating this resource (no id, since it
    /// is server-assigned).
    #[must_use]
    pub fn post_url(&self, session: &Session) -> String {
        format!(
            "{}/{}",
            session.url_prefix(),
            self.inner.read().resource_type
        )
    }

    /// Validate the attributes against the schema; a no-op when no model is
    /// registered for this resource type.
    ///
    /// # Errors
    ///
    /// Returns the first schema violation.
    pub fn validate(&self, schema: &Schema) -> Result<(), Error> {
        let state = self.read()?;
        schema.validate(&state.resource_type, &state.attributes.to_json())
    }

    /// Stage metadata to be sent with the next commit's payload.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn set_commit_meta(&self, meta: Value) -> Result<(), Error> {
        self.write()?.commit_meta = Some(meta);
        Ok(())
    }

    /// Mark this resource for deletion; the DELETE request is deferred to
    /// the next commit.
    ///
    /// # Errors
    ///
    /// Fails once the resource has been invalidated.
    pub fn delete(&self) -> Result<(), Error> {
        self.write()?.pending_delete = true;
        Ok(())
    }

    /// Commit this resource (blocking): DELETE when marked for deletion,
    /// POST when it has no id, PATCH with the changed fields otherwise.
    ///
    /// On a 200/201 response the resource state is replaced in place from
    /// the server's representation, preserving this handle. On 202 Accepted
    /// the server has no representation yet; a freshly read placeholder is
    /// returned instead. The resource is marked clean in every branch.
    ///
    /// # Errors
    ///
    /// Fails on a non-synchronous session, schema violations, transport
    /// errors, and non-success statuses (carrying the attempted payload).
    pub fn commit(&self, session: &Session) -> Result<Option<ResourceObject>, Error> {
        self.commit_with(session, None, None)
    }

    /// [`commit`](ResourceObject::commit) with a custom target URL and/or
    /// request metadata.
    ///
    /// # Errors
    ///
    /// See [`commit`](ResourceObject::commit).
    pub fn commit_with(
        &self,
        session: &Session,
        custom_url: Option<&str>,
        meta: Option<Value>,
    ) -> Result<Option<ResourceObject>, Error> {
        session.assert_sync()?;
        let pending_delete = self.read()?.pending_delete;
        if pending_delete {
            self.perform_delete(session, custom_url)?;
            return Ok(None);
        }
        let (method, url, payload) = self.prepare_commit(session, custom_url, meta)?;
        let response = session.http_request(method, &url, Some(&payload))?;
        self.finish_commit(session, response)
    }

    /// Commit this resource on an asynchronous session.
    ///
    /// # Errors
    ///
    /// See [`commit`](ResourceObject::commit).
    pub async fn commit_async(&self, session: &Session) -> Result<Option<ResourceObject>, Error> {
        self.commit_with_async(session, None, None).await
    }

    /// [`commit_async`](ResourceObject::commit_async) with a custom target
    /// URL and/or request metadata.
    ///
    /// # Errors
    ///
    /// See [`commit`](ResourceObject::commit).
    pub async fn commit_with_async(
        &self,
        session: &Session,
        custom_url: Option<&str>,
        meta: Option<Value>,
    ) -> Result<Option<ResourceObject>, Error> {
        session.assert_async()?;
        let pending_delete = self.read()?.pending_delete;
        if pending_delete {
            self.perform_delete_async(session, custom_url).await?;
            return Ok(None);
        }
        let (method, url, payload) = self.prepare_commit(session, custom_url, meta)?;
        let response = session.http_request_async(method, &url, Some(&payload)).await?;
        self.finish_commit(session, response)
    }

    fn prepare_commit(
        &self,
        session: &Session,
        custom_url: Option<&str>,
        meta: Option<Value>,
    ) -> Result<(HttpMethod, String, Value), Error> {
        self.validate(session.schema())?;
        let state = self.read()?;
        let method = if state.id.is_some() {
            HttpMethod::Patch
        } else {
            HttpMethod::Post
        };
        let url = match custom_url {
            Some(url) => url.to_owned(),
            None if method == HttpMethod::Post => format!(
                "{}/{}",
                session.url_prefix(),
                state.resource_type
            ),
            None => state
                .links
                .self_link()
                .map(|link| link.url(session))
                .or_else(|| {
                    state.id.as_ref().map(|id| {
                        format!("{}/{}/{id}", session.url_prefix(), state.resource_type)
                    })
                })
                .ok_or_else(|| Error::validation("resource has no URL to commit to"))?,
        };
        log::info!(
            "committing {}: {} to {url}",
            state.resource_type,
            state.id.as_deref().unwrap_or("<new>")
        );
        let payload = commit_payload(&state, method == HttpMethod::Post, meta);
        Ok((method, url, payload))
    }

    fn finish_commit(
        &self,
        session: &Session,
        response: HttpResponse,
    ) -> Result<Option<ResourceObject>, Error> {
        let HttpResponse {
            status,
            body,
            location,
        } = response;
        if http::has_resource(status) {
            if let Some(body) = &body {
                let document =
                    session.read(body.clone(), location.as_deref().unwrap_or(""), true)?;
                if let Some(updated) = document.resource()? {
                    self.replace_state_from(session, &updated);
                }
            }
        }
        self.mark_clean();
        if status == http::ACCEPTED {
            let document = session.read(
                body.unwrap_or_else(|| Value::Object(Map::new())),
                &location.unwrap_or_default(),
                true,
            )?;
            return document.resource();
        }
        Ok(None)
    }

    fn perform_delete(&self, session: &Session, custom_url: Option<&str>) -> Result<(), Error> {
        let url = self.delete_url(session, custom_url)?;
        session.http_request(HttpMethod::Delete, &url, None)?;
        session.remove_resource(self);
        self.inner.write().invalid = true;
        Ok(())
    }

    async fn perform_delete_async(
        &self,
        session: &Session,
        custom_url: Option<&str>,
    ) -> Result<(), Error> {
        let url = self.delete_url(session, custom_url)?;
        session
            .http_request_async(HttpMethod::Delete, &url, None)
            .await?;
        session.remove_resource(self);
        self.inner.write().invalid = true;
        Ok(())
    }

    fn delete_url(&self, session: &Session, custom_url: Option<&str>) -> Result<String, Error> {
        custom_url
            .map(str::to_owned)
            .or_else(|| self.url(session))
            .ok_or_else(|| Error::validation("cannot delete a resource that has no URL"))
    }

    /// Force-refetch this resource by identity and replace its state in
    /// place, preserving the handle.
    ///
    /// # Errors
    ///
    /// Fails on a non-synchronous session, transport errors, and when the
    /// server no longer knows the resource.
    pub fn refresh(&self, session: &Session) -> Result<(), Error> {
        session.assert_sync()?;
        let fetched = session
            .fetch_resource_by_identifier(&self.identifier(), false, true)?
            .ok_or_else(|| Error::validation("resource disappeared on refresh"))?;
        if !ResourceObject::ptr_eq(self, &fetched) {
            self.replace_state_from(session, &fetched);
        }
        Ok(())
    }

    /// Async form of [`refresh`](ResourceObject::refresh).
    ///
    /// # Errors
    ///
    /// See [`refresh`](ResourceObject::refresh).
    pub async fn refresh_async(&self, session: &Session) -> Result<(), Error> {
        session.assert_async()?;
        let fetched = session
            .fetch_resource_by_identifier_async(&self.identifier(), false, true)
            .await?
            .ok_or_else(|| Error::validation("resource disappeared on refresh"))?;
        if !ResourceObject::ptr_eq(self, &fetched) {
            self.replace_state_from(session, &fetched);
        }
        Ok(())
    }

    /// Replace owned state from another resource's representation and
    /// re-register this handle in the session cache. Clones of this handle
    /// observe the new state; the donor handle is left untouched.
    pub(crate) fn replace_state_from(&self, session: &Session, other: &ResourceObject) {
        if ResourceObject::ptr_eq(self, other) {
            return;
        }
        {
            let mut state = self.inner.write();
            let donor = other.inner.read();
            state.id = donor.id.clone();
            state.attributes = donor.attributes.clone();
            state.relationships = donor.relationships.clone();
            state.links = donor.links.clone();
            state.meta = donor.meta.clone();
        }
        session.add_resources([self.clone()]);
    }

    /// Mark every attribute and relationship clean.
    pub(crate) fn mark_clean(&self) {
        let mut state = self.inner.write();
        state.attributes.mark_clean();
        for (_, relationship) in &mut state.relationships {
            relationship.mark_clean();
        }
    }

    pub(crate) fn mark_invalid(&self) {
        self.inner.write().invalid = true;
    }
}

impl fmt::Debug for ResourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        f.debug_struct("ResourceObject")
            .field("type", &state.resource_type)
            .field("id", &state.id)
            .field("invalid", &state.invalid)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ResourceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.read();
        write!(
            f,
            "{}: {}",
            state.resource_type,
            state.id.as_deref().unwrap_or("<new>")
        )
    }
}

fn commit_payload(state: &ResourceState, full: bool, meta: Option<Value>) -> Value {
    let mut data = Map::new();
    data.insert("type".to_owned(), Value::String(state.resource_type.clone()));
    if let Some(id) = &state.id {
        data.insert("id".to_owned(), Value::String(id.clone()));
    }
    let mut relationships = Map::new();
    if full {
        // Creation sends the complete picture: all attributes minus nulls,
        // every relationship that has targets.
        for (name, relationship) in &state.relationships {
            if relationship.is_empty() {
                continue;
            }
            if let Some(value) = relationship.as_data() {
                relationships.insert(
                    name.clone(),
                    serde_json::json!({ "data": value }),
                );
            }
        }
        data.insert(
            "attributes".to_owned(),
            Value::Object(state.attributes.post_data()),
        );
    } else {
        for (name, relationship) in &state.relationships {
            if !relationship.is_dirty() {
                continue;
            }
            if let Some(value) = relationship.as_data() {
                relationships.insert(
                    name.clone(),
                    serde_json::json!({ "data": value }),
                );
            }
        }
        data.insert(
            "attributes".to_owned(),
            Value::Object(state.attributes.diff()),
        );
    }
    data.insert("relationships".to_owned(), Value::Object(relationships));
    let meta = meta.or_else(|| state.commit_meta.clone());
    if let Some(meta) = meta {
        data.insert("meta".to_owned(), meta);
    }
    serde_json::json!({ "data": Value::Object(data) })
}

fn parse_relationships(
    schema: &Schema,
    resource_type: &str,
    payload: Option<&Value>,
) -> Result<Vec<(String, Relationship)>, Error> {
    let mut data = match payload {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let mut relationships = Vec::new();
    if let Some(properties) = schema
        .schema_for_type(resource_type)
        .and_then(|model| model.get("properties"))
        .and_then(Value::as_object)
    {
        for (name, spec) in properties {
            let Some(kind) = Schema::relation_kind(spec) else {
                continue;
            };
            let allowed = Schema::allowed_resource_types(spec);
            let payload = data
                .remove(name)
                .unwrap_or_else(|| Value::Object(Map::new()));
            let relationship = Relationship::from_payload(name, &payload, Some(kind), allowed)?;
            relationships.push((name.clone(), relationship));
        }
        if !data.is_empty() {
            log::warn!(
                "relationships of `{resource_type}` not declared in schema: {:?}",
                data.keys().collect::<Vec<_>>()
            );
        }
    }
    for (name, payload) in data {
        let relationship = Relationship::from_payload(&name, &payload, None, Vec::new())?;
        relationships.push((name, relationship));
    }
    Ok(relationships)
}
