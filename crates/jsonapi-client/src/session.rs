//! The session: cache and orchestration of fetches and commits.
//!
//! Resources are fetched and cached in a session. A session is locked into
//! one [`Mode`] at construction; every operation that performs network I/O
//! has a blocking and an async form, and calling the wrong form for the
//! configured mode fails fast with a mode-mismatch error.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use url::{Position, Url};

use crate::{
    document::{AsyncResourceIterator, Document, ResourceIterator},
    error::{Error, Mode},
    http::{self, AsyncHttpTransport, HttpMethod, HttpResponse, HttpTransport},
    modifiers::QueryModifier,
    names::wire_name,
    objects::ResourceIdentifier,
    relationships::{Relationship, RelationshipValue},
    resource::ResourceObject,
    schema::Schema,
};

enum Transport {
    Blocking(Arc<dyn HttpTransport>),
    Async(Arc<dyn AsyncHttpTransport>),
}

/// Selects what to fetch from a resource collection: everything, one id, or
/// a modifier-narrowed subset.
pub enum Selector {
    /// The whole collection.
    All,
    /// A single resource by id.
    Id(String),
    /// The collection, narrowed by query modifiers.
    Modifier(Box<dyn QueryModifier>),
}

/// Conversion into a [`Selector`]: `()` selects the whole collection, a
/// string selects one resource by id, and any [`QueryModifier`] narrows the
/// collection.
pub trait IntoSelector {
    /// Perform the conversion.
    fn into_selector(self) -> Selector;
}

impl IntoSelector for () {
    fn into_selector(self) -> Selector {
        Selector::All
    }
}

impl IntoSelector for &str {
    fn into_selector(self) -> Selector {
        Selector::Id(self.to_owned())
    }
}

impl IntoSelector for String {
    fn into_selector(self) -> Selector {
        Selector::Id(self)
    }
}

impl IntoSelector for Selector {
    fn into_selector(self) -> Selector {
        self
    }
}

impl<M: QueryModifier + 'static> IntoSelector for M {
    fn into_selector(self) -> Selector {
        Selector::Modifier(Box::new(self))
    }
}

/// A field value accepted by [`Session::create`].
///
/// Plain JSON values become attributes (or relationship targets, when the
/// schema declares the field as a relationship); identifiers and resources
/// always address relationships.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A plain JSON value.
    Json(Value),
    /// A single typed relationship target.
    One(ResourceIdentifier),
    /// A sequence of typed relationship targets.
    Many(Vec<ResourceIdentifier>),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> FieldValue {
        FieldValue::Json(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> FieldValue {
        FieldValue::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> FieldValue {
        FieldValue::Json(Value::String(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> FieldValue {
        FieldValue::Json(Value::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> FieldValue {
        FieldValue::Json(Value::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> FieldValue {
        FieldValue::Json(Value::Bool(value))
    }
}

impl From<ResourceIdentifier> for FieldValue {
    fn from(identifier: ResourceIdentifier) -> FieldValue {
        FieldValue::One(identifier)
    }
}

impl From<&ResourceObject> for FieldValue {
    fn from(resource: &ResourceObject) -> FieldValue {
        FieldValue::One(resource.identifier())
    }
}

impl From<Vec<ResourceIdentifier>> for FieldValue {
    fn from(identifiers: Vec<ResourceIdentifier>) -> FieldValue {
        FieldValue::Many(identifiers)
    }
}

/// Conversion into a blocking transport, so
/// [`SessionOptions::transport`] accepts both concrete transports and
/// pre-wrapped `Arc`s.
pub trait IntoTransport {
    /// Perform the conversion.
    fn into_transport(self) -> Arc<dyn HttpTransport>;
}

impl<T: HttpTransport + 'static> IntoTransport for T {
    fn into_transport(self) -> Arc<dyn HttpTransport> {
        Arc::new(self)
    }
}

impl IntoTransport for Arc<dyn HttpTransport> {
    fn into_transport(self) -> Arc<dyn HttpTransport> {
        self
    }
}

/// Conversion into an async transport.
pub trait IntoAsyncTransport {
    /// Perform the conversion.
    fn into_transport(self) -> Arc<dyn AsyncHttpTransport>;
}

impl<T: AsyncHttpTransport + 'static> IntoAsyncTransport for T {
    fn into_transport(self) -> Arc<dyn AsyncHttpTransport> {
        Arc::new(self)
    }
}

impl IntoAsyncTransport for Arc<dyn AsyncHttpTransport> {
    fn into_transport(self) -> Arc<dyn AsyncHttpTransport> {
        self
    }
}

/// Configuration options for creating a [`Session`].
pub struct SessionOptions<T> {
    transport: T,
    schema: Schema,
}

impl SessionOptions<Arc<dyn HttpTransport>> {
    /// Create new [`SessionOptions`] with default settings: a blocking
    /// session backed by the default reqwest client.
    #[must_use]
    pub fn new() -> SessionOptions<Arc<dyn HttpTransport>> {
        SessionOptions {
            transport: Arc::new(DefaultTransport::new()),
            schema: Schema::empty(),
        }
    }

    /// Set a custom blocking transport.
    #[must_use]
    pub fn transport(mut self, transport: impl IntoTransport) -> Self {
        self.transport = transport.into_transport();
        self
    }

    /// Switch to an asynchronous session with the given transport.
    #[must_use]
    pub fn async_transport(
        self,
        transport: impl IntoAsyncTransport,
    ) -> SessionOptions<Arc<dyn AsyncHttpTransport>> {
        SessionOptions {
            transport: transport.into_transport(),
            schema: self.schema,
        }
    }

    /// Build a synchronous [`Session`] for the given server URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    pub fn build(self, server_url: &str) -> Result<Session, Error> {
        Session::from_parts(server_url, self.schema, Transport::Blocking(self.transport))
    }
}

impl SessionOptions<Arc<dyn AsyncHttpTransport>> {
    /// Build an asynchronous [`Session`] for the given server URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    pub fn build(self, server_url: &str) -> Result<Session, Error> {
        Session::from_parts(server_url, self.schema, Transport::Async(self.transport))
    }
}

impl<T> SessionOptions<T> {
    /// Set the schema used for validation and relationship typing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema data is not an object.
    pub fn schema(mut self, data: Value) -> Result<SessionOptions<T>, Error> {
        self.schema = Schema::new(data)?;
        Ok(self)
    }
}

impl Default for SessionOptions<Arc<dyn HttpTransport>> {
    fn default() -> Self {
        SessionOptions::new()
    }
}

/// Fallback transport used when none is injected; delegates to reqwest when
/// the `client` feature is enabled and fails otherwise.
struct DefaultTransport {
    #[cfg(feature = "client")]
    inner: std::sync::OnceLock<http::Client>,
}

impl DefaultTransport {
    fn new() -> DefaultTransport {
        DefaultTransport {
            #[cfg(feature = "client")]
            inner: std::sync::OnceLock::new(),
        }
    }
}

impl HttpTransport for DefaultTransport {
    #[cfg(feature = "client")]
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, crate::http::TransportError> {
        self.inner.get_or_init(http::Client::new).request(method, url, body)
    }

    #[cfg(not(feature = "client"))]
    fn request(
        &self,
        _method: HttpMethod,
        _url: &str,
        _body: Option<&Value>,
    ) -> Result<HttpResponse, crate::http::TransportError> {
        Err("no default HTTP transport (crate feature `client` is disabled); inject one via SessionOptions::transport".into())
    }
}

/// The session: fetches, caches, mutates and commits JSON:API resources.
///
/// # Examples
///
/// Blocking usage with the default client:
///
/// ```rust,no_run
/// use jsonapi_client::Session;
///
/// # fn example() -> Result<(), jsonapi_client::Error> {
/// let session = Session::new("http://localhost:8080/api")?;
/// let articles = session.get("articles", ())?;
/// for article in articles.resources()? {
///     println!("{}", article.attr("title")?);
/// }
/// # Ok(())
/// # }
/// ```
///
/// Async usage:
///
/// ```rust,no_run
/// use jsonapi_client::Session;
///
/// # async fn example() -> Result<(), jsonapi_client::Error> {
/// let session = Session::new_async("http://localhost:8080/api")?;
/// let article = session.get_async("articles", "1").await?
///     .resource()?
///     .expect("article exists");
/// article.set_attr("title", "Updated")?;
/// article.commit_async(&session).await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    url_prefix: String,
    origin: String,
    schema: Schema,
    transport: Transport,
    resources_by_identity: RwLock<AHashMap<(String, Option<String>), ResourceObject>>,
    resources_by_link: RwLock<AHashMap<String, ResourceObject>>,
    documents_by_link: RwLock<AHashMap<String, Document>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url_prefix", &self.url_prefix)
            .field("mode", &self.mode())
            .field(
                "cached_resources",
                &self.resources_by_identity.read().len(),
            )
            .field("cached_documents", &self.documents_by_link.read().len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a synchronous session with the default reqwest-backed
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    #[cfg(feature = "client")]
    pub fn new(server_url: &str) -> Result<Session, Error> {
        Session::options().transport(http::Client::new()).build(server_url)
    }

    /// Create an asynchronous session with the default reqwest-backed
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid.
    #[cfg(feature = "client")]
    pub fn new_async(server_url: &str) -> Result<Session, Error> {
        Session::options()
            .async_transport(http::AsyncClient::new())
            .build(server_url)
    }

    /// Get [`SessionOptions`] for configuring a new [`Session`].
    #[must_use]
    pub fn options() -> SessionOptions<Arc<dyn HttpTransport>> {
        SessionOptions::new()
    }

    fn from_parts(
        server_url: &str,
        schema: Schema,
        transport: Transport,
    ) -> Result<Session, Error> {
        let parsed = Url::parse(server_url).map_err(|error| Error::InvalidUrl {
            url: server_url.to_owned(),
            error,
        })?;
        let origin = parsed[..Position::BeforePath].to_owned();
        Ok(Session {
            url_prefix: server_url.trim_end_matches('/').to_owned(),
            origin,
            schema,
            transport,
            resources_by_identity: RwLock::new(AHashMap::new()),
            resources_by_link: RwLock::new(AHashMap::new()),
            documents_by_link: RwLock::new(AHashMap::new()),
        })
    }

    /// The mode this session is locked into.
    #[must_use]
    pub fn mode(&self) -> Mode {
        match &self.transport {
            Transport::Blocking(_) => Mode::Sync,
            Transport::Async(_) => Mode::Async,
        }
    }

    /// Fail fast when this session is not synchronous.
    ///
    /// # Errors
    ///
    /// Returns a mode-mismatch error on an asynchronous session.
    pub fn assert_sync(&self) -> Result<(), Error> {
        if self.mode() == Mode::Sync {
            Ok(())
        } else {
            log::error!("blocking API called on an asynchronous session");
            Err(Error::ModeMismatch {
                expected: Mode::Sync,
            })
        }
    }

    /// Fail fast when this session is not asynchronous.
    ///
    /// # Errors
    ///
    /// Returns a mode-mismatch error on a synchronous session.
    pub fn assert_async(&self) -> Result<(), Error> {
        if self.mode() == Mode::Async {
            Ok(())
        } else {
            log::error!("async API called on a synchronous session");
            Err(Error::ModeMismatch {
                expected: Mode::Async,
            })
        }
    }

    /// The schema this session validates against.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The server base URL including any path prefix, without a trailing
    /// slash.
    #[must_use]
    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// The server origin (`scheme://host[:port]`), used to resolve
    /// root-relative links.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.origin
    }

    /// Resolve a possibly-relative href against the server origin.
    #[must_use]
    pub fn absolute_url(&self, href: &str) -> String {
        if Url::parse(href).is_ok() {
            href.to_owned()
        } else {
            format!("{}{href}", self.origin)
        }
    }

    fn url_for(&self, resource_type: &str, selector: &Selector) -> String {
        let url = format!("{}/{resource_type}", self.url_prefix);
        match selector {
            Selector::All => url,
            Selector::Id(id) => format!("{url}/{id}"),
            Selector::Modifier(modifier) => modifier.url_with_modifiers(&url),
        }
    }

    // --- transport plumbing ------------------------------------------------

    fn blocking_transport(&self) -> Result<&Arc<dyn HttpTransport>, Error> {
        match &self.transport {
            Transport::Blocking(transport) => Ok(transport),
            Transport::Async(_) => Err(Error::ModeMismatch {
                expected: Mode::Sync,
            }),
        }
    }

    fn async_transport(&self) -> Result<&Arc<dyn AsyncHttpTransport>, Error> {
        match &self.transport {
            Transport::Async(transport) => Ok(transport),
            Transport::Blocking(_) => Err(Error::ModeMismatch {
                expected: Mode::Async,
            }),
        }
    }

    /// GET a document body, requiring HTTP 200.
    fn fetch_json(&self, url: &str) -> Result<Value, Error> {
        log::info!("fetching document from {url}");
        let transport = self.blocking_transport()?;
        let response = transport
            .request(HttpMethod::Get, url, None)
            .map_err(Error::Transport)?;
        Self::json_from_fetch(response)
    }

    async fn fetch_json_async(&self, url: &str) -> Result<Value, Error> {
        log::info!("fetching document from {url}");
        let transport = self.async_transport()?;
        let response = transport
            .request(HttpMethod::Get, url, None)
            .await
            .map_err(Error::Transport)?;
        Self::json_from_fetch(response)
    }

    fn json_from_fetch(response: HttpResponse) -> Result<Value, Error> {
        if response.status != 200 {
            return Err(Error::document(
                response.status,
                http::error_title(response.body.as_ref()),
                None,
            ));
        }
        response
            .body
            .ok_or_else(|| Error::validation("response body is not valid JSON"))
    }

    /// Issue a write request (POST/PATCH/DELETE), mapping non-success
    /// statuses to document errors that carry the attempted payload.
    pub(crate) fn http_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, Error> {
        log::debug!("{} request to {url}: {body:?}", method.as_str());
        let transport = self.blocking_transport()?;
        let response = transport
            .request(method, url, body)
            .map_err(Error::Transport)?;
        Self::check_write_response(response, body)
    }

    pub(crate) async fn http_request_async(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, Error> {
        log::debug!("{} request to {url}: {body:?}", method.as_str());
        let transport = self.async_transport()?;
        let response = transport
            .request(method, url, body)
            .await
            .map_err(Error::Transport)?;
        Self::check_write_response(response, body)
    }

    fn check_write_response(
        response: HttpResponse,
        body: Option<&Value>,
    ) -> Result<HttpResponse, Error> {
        if http::is_success(response.status) {
            Ok(response)
        } else {
            Err(Error::document(
                response.status,
                http::error_title(response.body.as_ref()),
                body.cloned(),
            ))
        }
    }

    // --- cache primitives --------------------------------------------------

    /// Add resources to the session cache, indexing by identity and by
    /// `self` link (or computed URL).
    pub fn add_resources<I>(&self, resources: I)
    where
        I: IntoIterator<Item = ResourceObject>,
    {
        for resource in resources {
            let identifier = resource.identifier();
            let link = resource
                .links()
                .ok()
                .and_then(|links| links.self_link().map(|link| link.url(self)))
                .or_else(|| resource.url(self));
            self.resources_by_identity
                .write()
                .insert((identifier.resource_type, identifier.id), resource.clone());
            if let Some(link) = link {
                self.resources_by_link.write().insert(link, resource);
            }
        }
    }

    /// Remove a resource from both cache indices.
    pub fn remove_resource(&self, resource: &ResourceObject) {
        let identifier = resource.identifier();
        self.resources_by_identity
            .write()
            .remove(&(identifier.resource_type, identifier.id));
        let mut links = Vec::new();
        if let Ok(resource_links) = resource.links() {
            if let Some(link) = resource_links.self_link() {
                links.push(link.url(self));
            }
        }
        if let Some(url) = resource.url(self) {
            links.push(url);
        }
        let mut by_link = self.resources_by_link.write();
        for link in links {
            by_link.remove(&link);
        }
    }

    fn cached_resource(&self, identifier: &ResourceIdentifier) -> Option<ResourceObject> {
        self.resources_by_identity
            .read()
            .get(&(identifier.resource_type.clone(), identifier.id.clone()))
            .cloned()
    }

    /// Resources in the cache that are waiting for a commit.
    #[must_use]
    pub fn dirty_resources(&self) -> Vec<ResourceObject> {
        self.resources_by_identity
            .read()
            .values()
            .filter(|resource| resource.is_dirty())
            .cloned()
            .collect()
    }

    /// Whether any cached resource is waiting for a commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.resources_by_identity
            .read()
            .values()
            .any(ResourceObject::is_dirty)
    }

    /// Mark every cached document and resource invalid and clear all
    /// caches. Subsequent field access on previously returned objects fails
    /// with an invalid-state error.
    pub fn invalidate(&self) {
        for document in self.documents_by_link.read().values() {
            document.mark_invalid();
        }
        for resource in self.resources_by_link.read().values() {
            resource.mark_invalid();
        }
        for resource in self.resources_by_identity.read().values() {
            resource.mark_invalid();
        }
        self.documents_by_link.write().clear();
        self.resources_by_link.write().clear();
        self.resources_by_identity.write().clear();
    }

    /// Close the session, invalidating all cached objects.
    pub fn close(&self) {
        log::info!("closing session");
        self.invalidate();
    }

    // --- reading documents -------------------------------------------------

    /// Parse an already-retrieved JSON document without network I/O.
    ///
    /// Contained resources are registered in the cache unless `no_cache`;
    /// the document itself is cached under `url` when caching is on and the
    /// URL is non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the document or a contained resource is
    /// malformed or fails schema validation.
    pub fn read(&self, json: Value, url: &str, no_cache: bool) -> Result<Document, Error> {
        let document = Document::from_json(self, json, url, no_cache)?;
        if !no_cache && !url.is_empty() {
            self.documents_by_link
                .write()
                .insert(url.to_owned(), document.clone());
        }
        Ok(document)
    }

    /// Fetch a document by URL (blocking), using the session's document
    /// cache. The cache is keyed by exact URL string and is not invalidated
    /// by time.
    ///
    /// # Errors
    ///
    /// Fails on a non-synchronous session, transport errors, non-200
    /// responses, and malformed documents.
    pub fn fetch_document_by_url(&self, url: &str) -> Result<Document, Error> {
        self.assert_sync()?;
        if let Some(document) = self.documents_by_link.read().get(url) {
            return Ok(document.clone());
        }
        let json = self.fetch_json(url)?;
        self.read(json, url, false)
    }

    /// Fetch a document by URL on an asynchronous session.
    ///
    /// # Errors
    ///
    /// See [`fetch_document_by_url`](Session::fetch_document_by_url).
    pub async fn fetch_document_by_url_async(&self, url: &str) -> Result<Document, Error> {
        self.assert_async()?;
        let cached = self.documents_by_link.read().get(url).cloned();
        if let Some(document) = cached {
            return Ok(document);
        }
        let json = self.fetch_json_async(url).await?;
        self.read(json, url, false)
    }

    /// GET a document from the server (blocking).
    ///
    /// The selector picks the whole collection (`()`), a single resource by
    /// id (`"42"`), or a modifier-narrowed subset (any [`QueryModifier`]).
    ///
    /// # Errors
    ///
    /// See [`fetch_document_by_url`](Session::fetch_document_by_url).
    pub fn get(&self, resource_type: &str, selector: impl IntoSelector) -> Result<Document, Error> {
        self.assert_sync()?;
        let url = self.url_for(resource_type, &selector.into_selector());
        self.fetch_document_by_url(&url)
    }

    /// GET a document from the server on an asynchronous session.
    ///
    /// # Errors
    ///
    /// See [`get`](Session::get).
    pub async fn get_async(
        &self,
        resource_type: &str,
        selector: impl IntoSelector,
    ) -> Result<Document, Error> {
        self.assert_async()?;
        let url = self.url_for(resource_type, &selector.into_selector());
        self.fetch_document_by_url_async(&url).await
    }

    /// GET a collection and iterate its resources across all pages
    /// (blocking), following `next` links strictly on demand.
    ///
    /// # Errors
    ///
    /// Fails on the first page's fetch; follow-up page failures surface as
    /// `Err` items of the iterator.
    pub fn iterate(
        &self,
        resource_type: &str,
        selector: impl IntoSelector,
    ) -> Result<ResourceIterator<'_>, Error> {
        self.assert_sync()?;
        let document = self.get(resource_type, selector)?;
        document.iter(self)
    }

    /// GET a collection and iterate its resources across all pages on an
    /// asynchronous session.
    ///
    /// # Errors
    ///
    /// Fails on the first page's fetch.
    pub async fn iterate_async(
        &self,
        resource_type: &str,
        selector: impl IntoSelector,
    ) -> Result<AsyncResourceIterator<'_>, Error> {
        self.assert_async()?;
        let document = self.get_async(resource_type, selector).await?;
        document.iter_async(self)
    }

    // --- resources ---------------------------------------------------------

    /// Fetch one resource through the cache.
    ///
    /// Returns the cached object when present (unless `force`); with
    /// `cache_only` never touches the network (returning `None` on a miss).
    /// With `force` the resource is refetched and the cached object is
    /// updated in place, so previously held handles observe the new state.
    ///
    /// Two concurrent fetches of the same identity are not coalesced; the
    /// second caller may issue a redundant request.
    ///
    /// # Errors
    ///
    /// Fails on a non-synchronous session, transport errors, and malformed
    /// responses.
    pub fn fetch_resource_by_identifier(
        &self,
        identifier: &ResourceIdentifier,
        cache_only: bool,
        force: bool,
    ) -> Result<Option<ResourceObject>, Error> {
        let cached = self.cached_resource(identifier);
        if !force {
            if let Some(resource) = cached {
                return Ok(Some(resource));
            }
        }
        if cache_only {
            return Ok(None);
        }
        self.assert_sync()?;
        let url = identifier.url(self);
        let json = self.fetch_json(&url)?;
        let document = self.read(json, &url, false)?;
        self.merge_fetched(document, cached)
    }

    /// Async form of
    /// [`fetch_resource_by_identifier`](Session::fetch_resource_by_identifier).
    ///
    /// # Errors
    ///
    /// See [`fetch_resource_by_identifier`](Session::fetch_resource_by_identifier).
    pub async fn fetch_resource_by_identifier_async(
        &self,
        identifier: &ResourceIdentifier,
        cache_only: bool,
        force: bool,
    ) -> Result<Option<ResourceObject>, Error> {
        let cached = self.cached_resource(identifier);
        if !force {
            if let Some(resource) = cached {
                return Ok(Some(resource));
            }
        }
        if cache_only {
            return Ok(None);
        }
        self.assert_async()?;
        let url = identifier.url(self);
        let json = self.fetch_json_async(&url).await?;
        let document = self.read(json, &url, false)?;
        self.merge_fetched(document, cached)
    }

    fn merge_fetched(
        &self,
        document: Document,
        cached: Option<ResourceObject>,
    ) -> Result<Option<ResourceObject>, Error> {
        let fetched = document
            .resource()?
            .ok_or_else(|| Error::validation("server returned no resource"))?;
        if let Some(existing) = cached {
            // Keep the previously returned handle authoritative: move the
            // fresh state into it and restore it in the cache.
            existing.replace_state_from(self, &fetched);
            return Ok(Some(existing));
        }
        Ok(Some(fetched))
    }

    // --- creating resources ------------------------------------------------

    /// Build an unsaved [`ResourceObject`] from field assignments.
    ///
    /// Dotted (or `__`-separated) keys build nested attribute paths. Fields
    /// the schema declares as relationships become relationship assignments
    /// with identifier coercion: a plain id is accepted only when the
    /// schema allows exactly one target type.
    ///
    /// The resource is dirty (it has no id) but is not added to the session
    /// cache until it is committed or explicitly added.
    ///
    /// # Errors
    ///
    /// Fails on relationship type mismatches and ambiguous plain ids.
    pub fn create<'f, I>(&self, resource_type: &str, fields: I) -> Result<ResourceObject, Error>
    where
        I: IntoIterator<Item = (&'f str, FieldValue)>,
    {
        let properties = self
            .schema
            .schema_for_type(resource_type)
            .and_then(|model| model.get("properties"))
            .and_then(Value::as_object);
        let mut attributes = Map::new();
        let mut relationships = Map::new();
        for (key, value) in fields {
            let key = wire_name(key);
            let spec = properties.and_then(|properties| properties.get(&key));
            let relation = spec.and_then(|spec| {
                Schema::relation_kind(spec).map(|kind| (kind, Schema::allowed_resource_types(spec)))
            });
            if let Some((kind, allowed)) = relation {
                let mut relationship = Relationship::empty(kind, allowed);
                let target = match value {
                    FieldValue::Json(json) => RelationshipValue::from_json(json)?,
                    FieldValue::One(identifier) => RelationshipValue::Identifier(identifier),
                    FieldValue::Many(identifiers) => {
                        RelationshipValue::Identifiers(identifiers)
                    }
                };
                relationship.set(target)?;
                let data = relationship.as_data().unwrap_or(Value::Null);
                relationships.insert(key, serde_json::json!({ "data": data }));
            } else {
                let FieldValue::Json(json) = value else {
                    return Err(Error::validation(format!(
                        "field `{key}` of `{resource_type}` is not a relationship"
                    )));
                };
                insert_nested(&mut attributes, &key, json);
            }
        }
        let data = serde_json::json!({
            "type": resource_type,
            "id": null,
            "attributes": attributes,
            "relationships": relationships,
        });
        ResourceObject::from_data(&self.schema, &data)
    }

    /// [`create`](Session::create) followed by an immediate blocking commit.
    ///
    /// # Errors
    ///
    /// See [`create`](Session::create) and
    /// [`ResourceObject::commit`](crate::ResourceObject::commit).
    pub fn create_and_commit<'f, I>(
        &self,
        resource_type: &str,
        fields: I,
    ) -> Result<ResourceObject, Error>
    where
        I: IntoIterator<Item = (&'f str, FieldValue)>,
    {
        let resource = self.create(resource_type, fields)?;
        resource.commit(self)?;
        Ok(resource)
    }

    /// [`create`](Session::create) followed by an immediate async commit.
    ///
    /// # Errors
    ///
    /// See [`create_and_commit`](Session::create_and_commit).
    pub async fn create_and_commit_async<'f, I>(
        &self,
        resource_type: &str,
        fields: I,
    ) -> Result<ResourceObject, Error>
    where
        I: IntoIterator<Item = (&'f str, FieldValue)>,
    {
        let resource = self.create(resource_type, fields)?;
        resource.commit_async(self).await?;
        Ok(resource)
    }

    // --- committing --------------------------------------------------------

    /// Commit every dirty cached resource (blocking).
    ///
    /// The dirty set is visited in cache-iteration order; no dependency
    /// ordering between cross-referencing resources is attempted.
    ///
    /// # Errors
    ///
    /// Stops at the first failing commit; already-committed resources stay
    /// clean, the rest stay dirty.
    pub fn commit(&self) -> Result<(), Error> {
        self.assert_sync()?;
        log::info!("committing dirty resources");
        for resource in self.dirty_resources() {
            resource.commit(self)?;
        }
        Ok(())
    }

    /// Commit every dirty cached resource on an asynchronous session.
    ///
    /// # Errors
    ///
    /// See [`commit`](Session::commit).
    pub async fn commit_async(&self) -> Result<(), Error> {
        self.assert_async()?;
        log::info!("committing dirty resources");
        for resource in self.dirty_resources() {
            resource.commit_async(self).await?;
        }
        Ok(())
    }
}

fn insert_nested(attributes: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        Some((head, rest)) => {
            let entry = attributes
                .entry(head.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(nested) = entry else {
                unreachable!("entry replaced with an object above");
            };
            insert_nested(nested, rest, value);
        }
        None => {
            attributes.insert(path.to_owned(), value);
        }
    }
}
