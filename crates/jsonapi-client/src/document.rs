//! The top-level parsed server response.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::{
    error::Error,
    objects::{Links, Meta},
    resource::ResourceObject,
    session::Session,
};

enum PrimaryData {
    None,
    Single(ResourceObject),
    Collection(Vec<ResourceObject>),
}

struct DocumentState {
    primary: PrimaryData,
    links: Links,
    meta: Meta,
    url: String,
    invalid: bool,
}

/// A parsed JSON:API document: the primary resource(s), top-level links and
/// meta, and the URL it was fetched from.
///
/// Parsing registers every contained resource (primary and `included`, in
/// document order) in the owning session's cache, so relationship
/// resolution finds them without refetching. `included` resources are
/// merged into the cache but are not part of the primary result.
#[derive(Clone)]
pub struct Document {
    inner: Arc<RwLock<DocumentState>>,
}

impl Document {
    pub(crate) fn from_json(
        session: &Session,
        json: Value,
        url: &str,
        no_cache: bool,
    ) -> Result<Document, Error> {
        let Value::Object(map) = json else {
            return Err(Error::validation("document must be a JSON object"));
        };
        let primary = match map.get("data") {
            Some(Value::Array(items)) => {
                let mut resources = Vec::with_capacity(items.len());
                for item in items {
                    let resource = ResourceObject::from_data(session.schema(), item)?;
                    if !no_cache {
                        session.add_resources([resource.clone()]);
                    }
                    resources.push(resource);
                }
                PrimaryData::Collection(resources)
            }
            Some(data @ Value::Object(_)) => {
                let resource = ResourceObject::from_data(session.schema(), data)?;
                if !no_cache {
                    session.add_resources([resource.clone()]);
                }
                PrimaryData::Single(resource)
            }
            _ => PrimaryData::None,
        };
        if let Some(Value::Array(included)) = map.get("included") {
            for item in included {
                let resource = ResourceObject::from_data(session.schema(), item)?;
                if !no_cache {
                    session.add_resources([resource]);
                }
            }
        }
        Ok(Document {
            inner: Arc::new(RwLock::new(DocumentState {
                primary,
                links: Links::from_value(map.get("links")),
                meta: Meta::from_value(map.get("meta")),
                url: url.to_owned(),
                invalid: false,
            })),
        })
    }

    fn read(&self) -> Result<parking_lot::RwLockReadGuard<'_, DocumentState>, Error> {
        let state = self.inner.read();
        if state.invalid {
            return Err(Error::InvalidState);
        }
        Ok(state)
    }

    /// The primary resource. For collection documents this is the first
    /// resource; `None` for empty documents.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn resource(&self) -> Result<Option<ResourceObject>, Error> {
        let state = self.read()?;
        Ok(match &state.primary {
            PrimaryData::Single(resource) => Some(resource.clone()),
            PrimaryData::Collection(resources) => resources.first().cloned(),
            PrimaryData::None => None,
        })
    }

    /// All primary resources, in document order.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn resources(&self) -> Result<Vec<ResourceObject>, Error> {
        let state = self.read()?;
        Ok(match &state.primary {
            PrimaryData::Single(resource) => vec![resource.clone()],
            PrimaryData::Collection(resources) => resources.clone(),
            PrimaryData::None => Vec::new(),
        })
    }

    /// Top-level document links.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn links(&self) -> Result<Links, Error> {
        Ok(self.read()?.links.clone())
    }

    /// Top-level document meta.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn meta(&self) -> Result<Meta, Error> {
        Ok(self.read()?.meta.clone())
    }

    /// The URL this document was fetched from (empty for offline reads).
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.read().url.clone()
    }

    fn next_page_url(&self, session: &Session) -> Result<Option<String>, Error> {
        Ok(self.read()?.links.next().map(|link| link.url(session)))
    }

    /// Iterate over the document's resources and all following pages
    /// (blocking).
    ///
    /// Pages are fetched strictly on demand: the next page is requested only
    /// once the current page's resources are exhausted, and iteration stops
    /// when a page carries no `next` link. A server that keeps producing
    /// `next` links produces an unbounded iterator; bounding is the caller's
    /// concern.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn iter<'s>(&self, session: &'s Session) -> Result<ResourceIterator<'s>, Error> {
        Ok(ResourceIterator {
            session,
            queue: self.resources()?.into(),
            next_url: self.next_page_url(session)?,
            done: false,
        })
    }

    /// Iterate over the document's resources and all following pages on an
    /// asynchronous session. See [`iter`](Document::iter) for the paging
    /// protocol.
    ///
    /// # Errors
    ///
    /// Fails once the document has been invalidated.
    pub fn iter_async<'s>(
        &self,
        session: &'s Session,
    ) -> Result<AsyncResourceIterator<'s>, Error> {
        Ok(AsyncResourceIterator {
            session,
            queue: self.resources()?.into(),
            next_url: self.next_page_url(session)?,
        })
    }

    pub(crate) fn mark_invalid(&self) {
        self.inner.write().invalid = true;
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        let primary = match &state.primary {
            PrimaryData::None => "none".to_owned(),
            PrimaryData::Single(_) => "single".to_owned(),
            PrimaryData::Collection(resources) => format!("collection[{}]", resources.len()),
        };
        f.debug_struct("Document")
            .field("primary", &primary)
            .field("url", &state.url)
            .field("invalid", &state.invalid)
            .finish_non_exhaustive()
    }
}

/// Blocking iterator over a paginated collection.
pub struct ResourceIterator<'s> {
    session: &'s Session,
    queue: VecDeque<ResourceObject>,
    next_url: Option<String>,
    done: bool,
}

impl Iterator for ResourceIterator<'_> {
    type Item = Result<ResourceObject, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(resource) = self.queue.pop_front() {
                return Some(Ok(resource));
            }
            if self.done {
                return None;
            }
            let url = self.next_url.take()?;
            let document = match self.session.fetch_document_by_url(&url) {
                Ok(document) => document,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            };
            let step = document
                .resources()
                .and_then(|resources| {
                    self.queue.extend(resources);
                    document.next_page_url(self.session)
                });
            match step {
                Ok(next_url) => self.next_url = next_url,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Asynchronous iterator over a paginated collection.
///
/// ```rust,no_run
/// # async fn example(session: &jsonapi_client::Session) -> Result<(), jsonapi_client::Error> {
/// let mut articles = session.iterate_async("articles", ()).await?;
/// while let Some(article) = articles.try_next().await? {
///     println!("{article}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct AsyncResourceIterator<'s> {
    session: &'s Session,
    queue: VecDeque<ResourceObject>,
    next_url: Option<String>,
}

impl AsyncResourceIterator<'_> {
    /// The next resource, fetching the next page when the current one is
    /// exhausted; `None` when pagination has terminated.
    ///
    /// # Errors
    ///
    /// Propagates fetch and parse errors of follow-up pages.
    pub async fn try_next(&mut self) -> Result<Option<ResourceObject>, Error> {
        loop {
            if let Some(resource) = self.queue.pop_front() {
                return Ok(Some(resource));
            }
            let Some(url) = self.next_url.take() else {
                return Ok(None);
            };
            let document = self.session.fetch_document_by_url_async(&url).await?;
            self.queue.extend(document.resources()?);
            self.next_url = document.next_page_url(self.session)?;
        }
    }
}
