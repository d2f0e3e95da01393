//! A client-side implementation of the [JSON:API](https://jsonapi.org/format/1.0/)
//! specification: fetch, cache, mutate and commit typed resource graphs
//! exchanged with a server over HTTP.
//!
//! The heart of the crate is the [`Session`]: it caches every
//! [`ResourceObject`] by identity and URL, tracks partial attribute and
//! relationship mutations, and commits the dirty set back to the server
//! with minimal PATCH payloads (or full POST payloads for new resources).
//!
//! # Fetching and mutating
//!
//! ```rust,no_run
//! use jsonapi_client::{modifiers::{Filter, Include, QueryModifier}, Session};
//!
//! # fn example() -> Result<(), jsonapi_client::Error> {
//! let session = Session::new("http://localhost:8080/api")?;
//!
//! // Whole collections, single resources, or filtered subsets.
//! let document = session.get(
//!     "articles",
//!     Filter::new("").field("author", "frank").and(Include::new(["comments"])),
//! )?;
//! for article in document.resources()? {
//!     println!("{}", article.attr("title")?);
//! }
//!
//! // Mutations are tracked per field and committed together.
//! let article = session.get("articles", "1")?.resource()?.expect("exists");
//! article.set_attr("title", "Revised title")?;
//! session.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Sync and async
//!
//! A session is locked into one mode at construction. Blocking calls on an
//! async session (and vice versa) fail fast with
//! [`Error::ModeMismatch`] instead of blocking or deadlocking; the async
//! call forms carry an `_async` suffix. Only network I/O suspends: cache
//! lookups, mutation, diffing and validation are identical in both modes.
//!
//! # Schema
//!
//! An optional [`Schema`] describes attribute shapes and relationship
//! target types per resource type and enables validation; without one,
//! documents are taken as-is. See [`Schema`] for the format.

pub mod modifiers;
pub mod names;

mod attributes;
mod document;
mod error;
mod http;
mod objects;
mod relationships;
mod resource;
mod schema;
mod session;

pub use attributes::{AttrValue, Attributes};
pub use document::{AsyncResourceIterator, Document, ResourceIterator};
pub use error::{Error, Mode};
#[cfg(feature = "client")]
pub use http::{AsyncClient, Client};
pub use http::{AsyncHttpTransport, HttpMethod, HttpResponse, HttpTransport, TransportError, MEDIA_TYPE};
pub use objects::{Link, Links, Meta, ResourceIdentifier};
pub use relationships::{Relationship, RelationshipData, RelationshipValue};
pub use resource::{ResourceField, ResourceObject};
pub use schema::{RelationKind, Schema};
pub use session::{
    FieldValue, IntoAsyncTransport, IntoSelector, IntoTransport, Selector, Session,
    SessionOptions,
};
