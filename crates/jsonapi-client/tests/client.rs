use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use jsonapi_client::{
    AsyncHttpTransport, Error, HttpMethod, HttpResponse, HttpTransport, Mode, ResourceObject,
    Session, TransportError,
};

const BASE: &str = "http://example.com/api";

/// Scripted transport: responses are registered per (method, URL) and every
/// request is recorded for assertions.
#[derive(Default)]
struct MockTransport {
    routes: Mutex<HashMap<(String, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<(String, String, Option<Value>)>>,
}

impl MockTransport {
    fn new() -> Arc<MockTransport> {
        Arc::new(MockTransport::default())
    }

    fn on(&self, method: HttpMethod, url: &str, status: u16, body: Value) {
        self.on_response(
            method,
            url,
            HttpResponse {
                status,
                body: Some(body),
                location: None,
            },
        );
    }

    fn on_response(&self, method: HttpMethod, url: &str, response: HttpResponse) {
        self.routes
            .lock()
            .expect("routes lock")
            .entry((method.as_str().to_owned(), url.to_owned()))
            .or_default()
            .push_back(response);
    }

    fn requests(&self) -> Vec<(String, String, Option<Value>)> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    fn serve(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().expect("requests lock").push((
            method.as_str().to_owned(),
            url.to_owned(),
            body.cloned(),
        ));
        self.routes
            .lock()
            .expect("routes lock")
            .get_mut(&(method.as_str().to_owned(), url.to_owned()))
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| format!("unexpected request: {} {url}", method.as_str()).into())
    }
}

impl HttpTransport for MockTransport {
    fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        self.serve(method, url, body)
    }
}

#[async_trait::async_trait]
impl AsyncHttpTransport for MockTransport {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
    ) -> Result<HttpResponse, TransportError> {
        self.serve(method, url, body)
    }
}

fn sync_session(transport: &Arc<MockTransport>) -> Session {
    Session::options()
        .transport(Arc::clone(transport) as Arc<dyn HttpTransport>)
        .build(BASE)
        .expect("valid base URL")
}

fn sync_session_with_schema(transport: &Arc<MockTransport>, schema: Value) -> Session {
    Session::options()
        .schema(schema)
        .expect("valid schema")
        .transport(Arc::clone(transport) as Arc<dyn HttpTransport>)
        .build(BASE)
        .expect("valid base URL")
}

fn async_session(transport: &Arc<MockTransport>) -> Session {
    Session::options()
        .async_transport(Arc::clone(transport) as Arc<dyn AsyncHttpTransport>)
        .build(BASE)
        .expect("valid base URL")
}

fn article(id: &str, title: &str) -> Value {
    json!({
        "type": "articles",
        "id": id,
        "attributes": {"title": title, "contact": {"phone": "555", "email": null}},
    })
}

fn article_schema() -> Value {
    json!({
        "articles": {
            "properties": {
                "title": {"type": "string"},
                "contact": {
                    "type": "object",
                    "properties": {
                        "phone": {"type": "string"},
                        "email": {"type": ["string", "null"]},
                    }
                },
                "author": {"relation": "to-one", "resource": ["people"]},
                "comments": {"relation": "to-many", "resource": ["comments"]},
            }
        }
    })
}

#[test]
fn cache_identity_without_force() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles/1"),
        200,
        json!({"data": article("1", "first")}),
    );
    let session = sync_session(&transport);

    let first = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    let second = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");

    assert!(ResourceObject::ptr_eq(&first, &second));
    // Second access was served from the document cache.
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn force_fetch_updates_in_place() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "old")}));
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "new")}));
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    assert_eq!(resource.attr("title").expect("readable"), json!("old"));

    let refetched = session
        .fetch_resource_by_identifier(&resource.identifier(), false, true)
        .expect("refetch succeeds")
        .expect("resource present");

    // Same in-memory object, new state.
    assert!(ResourceObject::ptr_eq(&resource, &refetched));
    assert_eq!(resource.attr("title").expect("readable"), json!("new"));
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn cache_only_fetch_never_hits_network() {
    let transport = MockTransport::new();
    let session = sync_session(&transport);
    let missing = session
        .fetch_resource_by_identifier(
            &jsonapi_client::ResourceIdentifier::new("articles", "404"),
            true,
            false,
        )
        .expect("cache-only lookup succeeds");
    assert!(missing.is_none());
    assert_eq!(transport.request_count(), 0);
}

#[test]
fn dirty_propagation_and_patch_diff() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "t")}));
    transport.on(
        HttpMethod::Patch,
        &url,
        200,
        json!({"data": {
            "type": "articles",
            "id": "1",
            "attributes": {"title": "t", "contact": {"phone": "666", "email": null}},
        }}),
    );
    let session = sync_session_with_schema(&transport, article_schema());

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    assert!(!resource.is_dirty());

    resource.set_attr("contact__phone", "666").expect("writable");
    assert!(resource.is_dirty());
    assert_eq!(resource.dirty_fields().expect("readable"), vec!["contact"]);
    assert!(session.is_dirty());

    session.commit().expect("commit succeeds");

    let requests = transport.requests();
    let (method, _, body) = requests.last().expect("a request was made");
    assert_eq!(method, "PATCH");
    // Only the changed subtree is sent.
    assert_eq!(
        body.clone().expect("has payload"),
        json!({"data": {
            "type": "articles",
            "id": "1",
            "attributes": {"contact": {"phone": "666"}},
            "relationships": {},
        }})
    );
    assert!(!resource.is_dirty());
    assert_eq!(resource.attr("contact__phone").expect("readable"), json!("666"));
}

#[test]
fn create_posts_full_null_pruned_payload() {
    let transport = MockTransport::new();
    let collection = format!("{BASE}/articles");
    transport.on(
        HttpMethod::Post,
        &collection,
        201,
        json!({"data": {
            "type": "articles",
            "id": "42",
            "attributes": {"title": "fresh", "contact": {"phone": "555", "email": null}},
            "relationships": {"author": {"data": {"id": "7", "type": "people"}}},
        }}),
    );
    let session = sync_session_with_schema(&transport, article_schema());

    let resource = session
        .create(
            "articles",
            [
                ("title", "fresh".into()),
                ("contact__phone", "555".into()),
                ("author", "7".into()),
            ],
        )
        .expect("creatable");
    assert!(resource.id().is_none());
    assert!(resource.is_dirty());

    resource.commit(&session).expect("commit succeeds");

    let requests = transport.requests();
    let (method, url, body) = requests.last().expect("a request was made");
    assert_eq!(method, "POST");
    assert_eq!(url, &collection);
    // Null-valued fields (the schema-defaulted `email`) are pruned; the
    // plain id was coerced to a typed identifier via the schema.
    assert_eq!(
        body.clone().expect("has payload"),
        json!({"data": {
            "type": "articles",
            "attributes": {"title": "fresh", "contact": {"phone": "555"}},
            "relationships": {"author": {"data": {"id": "7", "type": "people"}}},
        }})
    );

    // Server-assigned id was applied to the same handle.
    assert_eq!(resource.id(), Some("42".to_owned()));
    assert!(!resource.is_dirty());
    let cached = session
        .fetch_resource_by_identifier(&resource.identifier(), true, false)
        .expect("cache lookup succeeds")
        .expect("committed resource is cached");
    assert!(ResourceObject::ptr_eq(&resource, &cached));
}

#[test]
fn create_rejects_bad_relationship_targets() {
    let transport = MockTransport::new();
    let session = sync_session_with_schema(&transport, article_schema());

    // Wrong resource type.
    let wrong_type = session.create(
        "articles",
        [(
            "author",
            jsonapi_client::ResourceIdentifier::new("comments", "1").into(),
        )],
    );
    assert!(matches!(wrong_type, Err(Error::Validation(_))));

    // Plain id with more than one allowed type is ambiguous.
    let ambiguous_schema = json!({
        "articles": {
            "properties": {
                "author": {"relation": "to-one", "resource": ["people", "robots"]},
            }
        }
    });
    let session = sync_session_with_schema(&transport, ambiguous_schema);
    let ambiguous = session.create("articles", [("author", "7".into())]);
    assert!(matches!(ambiguous, Err(Error::Validation(_))));
}

#[test]
fn accepted_returns_placeholder_and_marks_clean() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "t")}));
    transport.on_response(
        HttpMethod::Patch,
        &url,
        HttpResponse {
            status: 202,
            body: None,
            location: Some(format!("{BASE}/queue/55")),
        },
    );
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    resource.set_attr("title", "queued").expect("writable");

    let placeholder = resource.commit(&session).expect("commit succeeds");
    // No body came back, so there is no placeholder resource, but the
    // resource is clean regardless.
    assert!(placeholder.is_none());
    assert!(!resource.is_dirty());
    // The local mutation is kept; no server state overwrote it.
    assert_eq!(resource.attr("title").expect("readable"), json!("queued"));
}

#[test]
fn delete_is_deferred_to_commit() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "t")}));
    transport.on(HttpMethod::Delete, &url, 204, json!(null));
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");

    resource.delete().expect("deletable");
    assert!(resource.is_dirty());
    assert_eq!(transport.request_count(), 1);

    resource.commit(&session).expect("commit succeeds");
    assert_eq!(
        transport.requests().last().map(|(method, url, _)| (method.clone(), url.clone())),
        Some(("DELETE".to_owned(), url))
    );

    // Gone from the cache, and the handle is dead.
    assert!(session
        .fetch_resource_by_identifier(
            &jsonapi_client::ResourceIdentifier::new("articles", "1"),
            true,
            false,
        )
        .expect("cache lookup succeeds")
        .is_none());
    assert!(matches!(resource.attr("title"), Err(Error::InvalidState)));
}

#[test]
fn pagination_yields_all_pages_then_stops() {
    let transport = MockTransport::new();
    let page = |ids: &[&str], next: Option<&str>| {
        let mut document = json!({
            "data": ids.iter().map(|id| article(id, "t")).collect::<Vec<_>>(),
        });
        if let Some(next) = next {
            document["links"] = json!({"next": next});
        }
        document
    };
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles"),
        200,
        page(&["1", "2"], Some("/api/articles?page=2")),
    );
    transport.on(
        HttpMethod::Get,
        "http://example.com/api/articles?page=2",
        200,
        page(&["3"], Some("/api/articles?page=3")),
    );
    transport.on(
        HttpMethod::Get,
        "http://example.com/api/articles?page=3",
        200,
        page(&["4", "5"], None),
    );
    let session = sync_session(&transport);

    let mut iterator = session.iterate("articles", ()).expect("first page fetch");
    // Strictly on-demand: nothing beyond the first page is fetched until
    // its resources are exhausted.
    let first: Vec<_> = iterator.by_ref().take(2).collect::<Result<_, _>>().expect("page one");
    assert_eq!(transport.request_count(), 1);
    assert_eq!(first.len(), 2);

    let rest: Vec<_> = iterator.collect::<Result<_, _>>().expect("remaining pages");
    assert_eq!(transport.request_count(), 3);
    let mut ids: Vec<_> = first.iter().chain(rest.iter()).map(|r| r.id()).collect();
    assert_eq!(
        ids.drain(..).map(Option::unwrap).collect::<Vec<_>>(),
        vec!["1", "2", "3", "4", "5"]
    );
}

#[test]
fn invalidate_kills_cached_objects() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles/1"),
        200,
        json!({"data": article("1", "t")}),
    );
    let session = sync_session(&transport);

    let document = session.get("articles", "1").expect("fetch succeeds");
    let resource = document
        .resource()
        .expect("document valid")
        .expect("resource present");

    session.invalidate();

    assert!(matches!(resource.attr("title"), Err(Error::InvalidState)));
    assert!(matches!(resource.set_attr("title", "x"), Err(Error::InvalidState)));
    assert!(matches!(document.resource(), Err(Error::InvalidState)));
    // Caches are empty: a cache-only lookup finds nothing.
    assert!(session
        .fetch_resource_by_identifier(
            &jsonapi_client::ResourceIdentifier::new("articles", "1"),
            true,
            false,
        )
        .expect("cache lookup succeeds")
        .is_none());
}

#[test]
fn blocking_api_fails_fast_on_async_session() {
    let transport = MockTransport::new();
    let session = async_session(&transport);

    assert_eq!(session.mode(), Mode::Async);
    assert!(matches!(
        session.commit(),
        Err(Error::ModeMismatch { expected: Mode::Sync })
    ));
    assert!(matches!(
        session.get("articles", ()),
        Err(Error::ModeMismatch { expected: Mode::Sync })
    ));
    // Fail-fast means no network traffic happened.
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn async_api_fails_fast_on_sync_session() {
    let transport = MockTransport::new();
    let session = sync_session(&transport);

    assert!(matches!(
        session.get_async("articles", ()).await,
        Err(Error::ModeMismatch { expected: Mode::Async })
    ));
    assert!(matches!(
        session.commit_async().await,
        Err(Error::ModeMismatch { expected: Mode::Async })
    ));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn async_fetch_mutate_commit() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "t")}));
    transport.on(
        HttpMethod::Patch,
        &url,
        200,
        json!({"data": {
            "type": "articles",
            "id": "1",
            "attributes": {"title": "async", "contact": {"phone": "555", "email": null}},
        }}),
    );
    let session = async_session(&transport);

    let resource = session
        .get_async("articles", "1")
        .await
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    resource.set_attr("title", "async").expect("writable");
    session.commit_async().await.expect("commit succeeds");

    assert!(!resource.is_dirty());
    assert_eq!(resource.attr("title").expect("readable"), json!("async"));
}

#[tokio::test]
async fn async_pagination() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles"),
        200,
        json!({
            "data": [article("1", "t")],
            "links": {"next": "/api/articles?page=2"},
        }),
    );
    transport.on(
        HttpMethod::Get,
        "http://example.com/api/articles?page=2",
        200,
        json!({"data": [article("2", "t")]}),
    );
    let session = async_session(&transport);

    let mut iterator = session
        .iterate_async("articles", ())
        .await
        .expect("first page fetch");
    let mut ids = Vec::new();
    while let Some(resource) = iterator.try_next().await.expect("iteration succeeds") {
        ids.push(resource.id().expect("server resources have ids"));
    }
    assert_eq!(ids, vec!["1", "2"]);
}

#[test]
fn read_errors_surface_status_and_title() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles/9"),
        404,
        json!({"errors": [{"title": "Not found"}]}),
    );
    let session = sync_session(&transport);

    match session.get("articles", "9") {
        Err(Error::Document { status, title, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(title, "Not found");
        }
        other => panic!("expected a document error, got {other:?}"),
    }
}

#[test]
fn write_errors_carry_the_attempted_payload() {
    let transport = MockTransport::new();
    let url = format!("{BASE}/articles/1");
    transport.on(HttpMethod::Get, &url, 200, json!({"data": article("1", "t")}));
    transport.on(
        HttpMethod::Patch,
        &url,
        409,
        json!({"errors": [{"title": "Conflict"}]}),
    );
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    resource.set_attr("title", "clash").expect("writable");

    match resource.commit(&session) {
        Err(Error::Document { status, title, payload }) => {
            assert_eq!(status, 409);
            assert_eq!(title, "Conflict");
            let payload = payload.expect("write errors carry the payload");
            assert_eq!(payload["data"]["attributes"], json!({"title": "clash"}));
        }
        other => panic!("expected a document error, got {other:?}"),
    }
    // A failed commit leaves the dirty flags untouched, so a retry resends
    // the same diff.
    assert!(resource.is_dirty());
}

#[test]
fn included_resources_resolve_relationships_from_cache() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles/1"),
        200,
        json!({
            "data": {
                "type": "articles",
                "id": "1",
                "attributes": {"title": "t"},
                "relationships": {"author": {"data": {"id": "7", "type": "people"}}},
            },
            "included": [{
                "type": "people",
                "id": "7",
                "attributes": {"name": "Frank"},
            }],
        }),
    );
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");
    let author = resource
        .relationship("author")
        .expect("relationship exists")
        .resource(&session)
        .expect("resolution succeeds")
        .expect("author present");

    assert_eq!(author.attr("name").expect("readable"), json!("Frank"));
    // Resolution came from the cache; no request for /people/7 was made
    // (the transport has no route for it and would have failed).
    assert_eq!(transport.request_count(), 1);
}

#[test]
fn unknown_fields_are_rejected() {
    let transport = MockTransport::new();
    transport.on(
        HttpMethod::Get,
        &format!("{BASE}/articles/1"),
        200,
        json!({"data": article("1", "t")}),
    );
    let session = sync_session(&transport);

    let resource = session
        .get("articles", "1")
        .expect("fetch succeeds")
        .resource()
        .expect("document valid")
        .expect("resource present");

    match resource.attr("no_such_field") {
        Err(Error::UnknownField { resource_type, field }) => {
            assert_eq!(resource_type, "articles");
            assert_eq!(field, "no-such-field");
        }
        other => panic!("expected an unknown-field error, got {other:?}"),
    }
}

#[test]
fn offline_read_registers_resources() {
    let transport = MockTransport::new();
    let session = sync_session(&transport);

    let document = session
        .read(
            json!({"data": [article("1", "a"), article("2", "b")]}),
            "",
            false,
        )
        .expect("parse succeeds");
    assert_eq!(document.resources().expect("document valid").len(), 2);

    let cached = session
        .fetch_resource_by_identifier(
            &jsonapi_client::ResourceIdentifier::new("articles", "2"),
            true,
            false,
        )
        .expect("cache lookup succeeds")
        .expect("registered by read");
    assert_eq!(cached.attr("title").expect("readable"), json!("b"));

    // With no_cache nothing is registered.
    session
        .read(json!({"data": article("3", "c")}), "", true)
        .expect("parse succeeds");
    assert!(session
        .fetch_resource_by_identifier(
            &jsonapi_client::ResourceIdentifier::new("articles", "3"),
            true,
            false,
        )
        .expect("cache lookup succeeds")
        .is_none());
}
