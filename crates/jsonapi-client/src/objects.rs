//! Small JSON:API document objects: resource identifiers, links and meta.

use std::fmt;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{document::Document, error::Error, resource::ResourceObject, session::Session};

/// The minimal `{type, id}` reference form used inside relationships and as
/// the session cache key.
///
/// <https://jsonapi.org/format/1.0/#document-resource-identifier-objects>
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Resource type name.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Server-assigned id; `None` for resources that have not been created
    /// yet.
    #[serde(default)]
    pub id: Option<String>,
}

impl ResourceIdentifier {
    /// Create an identifier from a type and id.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> ResourceIdentifier {
        ResourceIdentifier {
            resource_type: resource_type.into(),
            id: Some(id.into()),
        }
    }

    /// The canonical URL of the identified resource.
    #[must_use]
    pub fn url(&self, session: &Session) -> String {
        format!(
            "{}/{}/{}",
            session.url_prefix(),
            self.resource_type,
            self.id.as_deref().unwrap_or_default()
        )
    }

    /// The wire form: `{"id": ..., "type": ...}`, or `null` when the
    /// resource has no id yet.
    #[must_use]
    pub fn to_data(&self) -> Value {
        match &self.id {
            Some(id) => serde_json::json!({"id": id, "type": self.resource_type}),
            None => Value::Null,
        }
    }

    /// Resolve the identified resource through the session cache, fetching
    /// from the server on a miss unless `cache_only`.
    ///
    /// # Errors
    ///
    /// Returns an error on fetch or parse failure; see
    /// [`Session::fetch_resource_by_identifier`].
    pub fn fetch(
        &self,
        session: &Session,
        cache_only: bool,
    ) -> Result<Option<ResourceObject>, Error> {
        session.fetch_resource_by_identifier(self, cache_only, false)
    }

    /// Async form of [`fetch`](ResourceIdentifier::fetch).
    ///
    /// # Errors
    ///
    /// See [`fetch`](ResourceIdentifier::fetch).
    pub async fn fetch_async(
        &self,
        session: &Session,
        cache_only: bool,
    ) -> Result<Option<ResourceObject>, Error> {
        session
            .fetch_resource_by_identifier_async(self, cache_only, false)
            .await
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.resource_type,
            self.id.as_deref().unwrap_or("<new>")
        )
    }
}

/// A single document or resource link.
///
/// <https://jsonapi.org/format/1.0/#document-links>
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    href: String,
    meta: Option<Value>,
}

impl Link {
    /// Parse a link value: either a bare string or a `{href, meta}` object.
    pub(crate) fn from_value(value: &Value) -> Option<Link> {
        match value {
            Value::String(href) => Some(Link {
                href: href.clone(),
                meta: None,
            }),
            Value::Object(map) => {
                let href = map.get("href")?.as_str()?.to_owned();
                Some(Link {
                    href,
                    meta: map.get("meta").cloned(),
                })
            }
            _ => None,
        }
    }

    /// The raw href, possibly relative to the server root.
    #[must_use]
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Link meta object, when the server supplied one.
    #[must_use]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// The absolute URL of this link, resolving relative hrefs against the
    /// session's server origin.
    #[must_use]
    pub fn url(&self, session: &Session) -> String {
        session.absolute_url(&self.href)
    }

    /// Follow the link (blocking) and parse the result as a [`Document`].
    ///
    /// # Errors
    ///
    /// Fails on a non-synchronous session, on transport errors, or when the
    /// server answers with a non-success status.
    pub fn fetch(&self, session: &Session) -> Result<Document, Error> {
        session.assert_sync()?;
        session.fetch_document_by_url(&self.url(session))
    }

    /// Follow the link and parse the result as a [`Document`].
    ///
    /// # Errors
    ///
    /// Fails on a non-asynchronous session, on transport errors, or when the
    /// server answers with a non-success status.
    pub async fn fetch_async(&self, session: &Session) -> Result<Document, Error> {
        session.assert_async()?;
        session.fetch_document_by_url_async(&self.url(session)).await
    }
}

/// Named links of a document, resource or relationship.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Links {
    links: AHashMap<String, Link>,
}

impl Links {
    /// Parse a `links` member; anything but an object yields empty links.
    pub(crate) fn from_value(value: Option<&Value>) -> Links {
        let mut links = AHashMap::new();
        if let Some(Value::Object(map)) = value {
            for (name, value) in map {
                if let Some(link) = Link::from_value(value) {
                    links.insert(name.clone(), link);
                }
            }
        }
        Links { links }
    }

    /// Look up a link by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    /// The `self` link.
    #[must_use]
    pub fn self_link(&self) -> Option<&Link> {
        self.get("self")
    }

    /// The `related` link.
    #[must_use]
    pub fn related(&self) -> Option<&Link> {
        self.get("related")
    }

    /// The pagination `next` link.
    #[must_use]
    pub fn next(&self) -> Option<&Link> {
        self.get("next")
    }

    /// Whether any link is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Iterate over `(name, link)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Link)> {
        self.links.iter().map(|(name, link)| (name.as_str(), link))
    }
}

/// Free-form meta information attached to documents, resources, links and
/// relationships.
///
/// <https://jsonapi.org/format/1.0/#document-meta>
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    entries: serde_json::Map<String, Value>,
}

impl Meta {
    /// Parse a `meta` member; anything but an object yields empty meta.
    pub(crate) fn from_value(value: Option<&Value>) -> Meta {
        match value {
            Some(Value::Object(entries)) => Meta {
                entries: entries.clone(),
            },
            _ => Meta::default(),
        }
    }

    /// Look up a meta member by its wire name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Whether any member is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The meta object as plain JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.clone())
    }
}
