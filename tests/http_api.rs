//! HTTP surface tests through the axum router

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use odataquery::coercion::DateCoercion;
use odataquery::config::{EntitySetConfig, ServerConfig};
use odataquery::http::ODataServer;
use odataquery::memory::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, MemoryStore) {
    let mut orders = EntitySetConfig::new("Orders");
    orders.collection = Some("orders".to_string());
    orders.search_fields = vec!["name".to_string()];
    orders.seed = vec![
        json!({"_id": 1, "name": "Alpha", "total": 5}),
        json!({"_id": 2, "name": "Beta", "total": 15}),
        json!({"_id": 3, "name": "Gamma", "total": 10}),
    ];

    let config = ServerConfig {
        entity_sets: vec![orders],
        ..Default::default()
    };
    let store = MemoryStore::new();
    let router = ODataServer::with_store(config, &store).unwrap().router();
    (router, store)
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "example.com")
        .body(Body::empty())
        .unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "example.com")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

#[tokio::test]
async fn test_query_returns_envelope_with_version_header() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Orders?$top=2&$count=true")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("OData-Version").unwrap(), "4.0");

    let body = body_json(response).await;
    assert_eq!(body["value"].as_array().unwrap().len(), 2);
    assert_eq!(body["@odata.count"], json!(3));
    assert_eq!(
        body["@odata.nextLink"],
        json!("http://example.com/odata/Orders?$top=2&$skip=2&$count=true")
    );
}

#[tokio::test]
async fn test_count_endpoint_is_plain_text() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Orders/$count?$filter=total%20gt%205")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(body_text(response).await, "2");
}

#[tokio::test]
async fn test_bad_filter_is_400_with_error_body() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Orders?$filter=name%20eq")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers().get("OData-Version").unwrap(), "4.0");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("BadRequest"));
}

#[tokio::test]
async fn test_unknown_entity_set_is_404() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Customers")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], json!("NotFound"));
}

fn with_raw_body(method: &str, uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "example.com")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_malformed_json_body_uses_error_envelope() {
    let (router, store) = app();

    for (method, uri) in [
        ("POST", "/odata/Orders"),
        ("PATCH", "/odata/Orders/1"),
        ("POST", "/odata/$batch"),
    ] {
        let response = send(&router, with_raw_body(method, uri, "{not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert_eq!(response.headers().get("OData-Version").unwrap(), "4.0");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!("BadRequest"));
        assert!(body["error"]["message"].is_string());
    }

    let orders = store.collection("orders").unwrap();
    assert_eq!(orders.len().unwrap(), 3);
}

#[tokio::test]
async fn test_unmatched_path_uses_error_envelope() {
    let (router, _) = app();
    let response = send(&router, get("/elsewhere")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get("OData-Version").unwrap(), "4.0");
    assert_eq!(body_json(response).await["error"]["code"], json!("NotFound"));
}

#[tokio::test]
async fn test_compute_failure_on_row_data_is_500() {
    let (router, store) = app();
    store
        .collection("orders")
        .unwrap()
        .insert_many(vec![json!({"_id": 4, "name": "Delta", "total": "x"})])
        .unwrap();

    let response = send(&router, get("/odata/Orders?$compute=total%20mul%202%20as%20d")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"]["code"], json!("ServerError"));
}

#[tokio::test]
async fn test_unimplemented_functions_header() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Orders?$filter=startswith(name,'Al')")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("X-OData-Unimplemented").unwrap(),
        "startswith("
    );
    let body = body_json(response).await;
    assert_eq!(body["value"][0]["name"], json!("Alpha"));
}

#[tokio::test]
async fn test_metadata_document() {
    let (router, _) = app();
    let response = send(&router, get("/odata/$metadata")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/xml"
    );
    let xml = body_text(response).await;
    assert!(xml.contains("<Schema Namespace=\"Default\""));
    assert!(xml.contains("<EntityType Name=\"Order\">"));
    assert!(xml.contains("<EntitySet Name=\"Orders\" EntityType=\"Default.Order\" />"));
    assert!(xml.contains("<Property Name=\"id\" Type=\"Edm.String\" Nullable=\"false\" />"));
}

#[tokio::test]
async fn test_delta_round_trip() {
    let (router, _) = app();

    let response = send(&router, get("/odata/Orders?$delta=true")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let link = body_json(response).await["@odata.deltaLink"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(link.starts_with("http://example.com/odata/Orders?$deltatoken="));

    let created = send(
        &router,
        with_json("POST", "/odata/Orders", json!({"_id": 4, "name": "Delta"})),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert!(body_json(created).await["_updatedAtMs"].is_u64());

    let path = link.trim_start_matches("http://example.com");
    let changes = body_json(send(&router, get(path)).await).await;
    assert_eq!(changes["value"].as_array().unwrap().len(), 1);
    assert_eq!(changes["value"][0]["name"], json!("Delta"));
}

#[tokio::test]
async fn test_invalid_delta_token() {
    let (router, _) = app();
    let response = send(&router, get("/odata/Orders?$deltatoken=bogus")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"]["message"],
        json!("Invalid delta token")
    );
}

#[tokio::test]
async fn test_patch_updates_by_numeric_key() {
    let (router, store) = app();

    let response = send(
        &router,
        with_json("PATCH", "/odata/Orders/2", json!({"name": "Beta2"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let rows = store.collection("orders").unwrap().all().unwrap();
    assert_eq!(rows[1]["name"], json!("Beta2"));
    assert!(rows[1]["_updatedAtMs"].is_u64());

    let missing = send(
        &router,
        with_json("PATCH", "/odata/Orders/99", json!({"name": "Nobody"})),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_endpoint() {
    let (router, store) = app();
    let response = send(
        &router,
        with_json(
            "POST",
            "/odata/$batch",
            json!({
                "requests": [
                    {"method": "GET", "url": "/odata/Orders?$top=1"},
                    {"method": "GET", "url": "/odata/Orders?$count=true"},
                    {"method": "POST", "url": "/odata/Orders", "body": {"_id": 9}, "atomicGroup": "g1"},
                    {"method": "DELETE", "url": "/odata/Orders/1", "atomicGroup": "g1"}
                ]
            }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("OData-Version").unwrap(), "4.0");
    let body = body_json(response).await;
    let responses = body["responses"].as_array().unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["status"], json!(200));
    assert_eq!(responses[1]["body"]["@odata.count"], json!(3));
    assert_eq!(
        responses[2]["body"],
        json!({"atomicGroup": "g1", "success": true})
    );

    let ids: Vec<Value> = store
        .collection("orders")
        .unwrap()
        .all()
        .unwrap()
        .iter()
        .map(|row| row["_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!(2), json!(3), json!(9)]);
}

#[tokio::test]
async fn test_configured_date_fields_are_coerced() {
    let mut shipments = EntitySetConfig::new("Shipments");
    shipments.date_coercion = Some(DateCoercion {
        fields: vec!["shipped".to_string(), "loggedAt".to_string()],
        ..Default::default()
    });
    shipments.seed = vec![
        json!({"_id": 1, "shipped": "03/05/2024", "loggedAt": 1_700_000_000, "note": "03/05/2024"}),
        json!({"_id": 2, "shipped": "unknown"}),
    ];
    let config = ServerConfig {
        entity_sets: vec![shipments],
        ..Default::default()
    };
    let router = ODataServer::with_store(config, &MemoryStore::new()).unwrap().router();

    let response = send(&router, get("/odata/Shipments?$orderby=_id")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["value"][0]["shipped"], json!("2024-03-05T00:00:00.000Z"));
    assert_eq!(body["value"][0]["loggedAt"], json!("2023-11-14T22:13:20.000Z"));
    assert_eq!(body["value"][0]["note"], json!("03/05/2024"));
    assert_eq!(body["value"][1]["shipped"], json!("unknown"));
}

#[tokio::test]
async fn test_custom_key_matches_in_patch_and_batch() {
    let mut items = EntitySetConfig::new("Items");
    items.key = "sku".to_string();
    items.seed = vec![
        json!({"_id": 1, "sku": "A1", "name": "Anvil"}),
        json!({"_id": 2, "sku": "B2", "name": "Bolt"}),
    ];
    let config = ServerConfig {
        entity_sets: vec![items],
        ..Default::default()
    };
    let store = MemoryStore::new();
    let router = ODataServer::with_store(config, &store).unwrap().router();

    let patched = send(&router, with_json("PATCH", "/odata/Items/A1", json!({"name": "Anvil2"}))).await;
    assert_eq!(patched.status(), StatusCode::NO_CONTENT);

    let response = send(
        &router,
        with_json(
            "POST",
            "/odata/$batch",
            json!({
                "requests": [
                    {"method": "PATCH", "url": "/odata/Items('B2')", "body": {"name": "Bolt2"}, "atomicGroup": "g"},
                    {"method": "DELETE", "url": "/odata/Items/1", "atomicGroup": "h"}
                ]
            }),
        ),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["responses"][0]["status"], json!(200));
    assert_eq!(body["responses"][1]["status"], json!(404));

    let rows = store.collection("Items").unwrap().all().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], json!("Anvil2"));
    assert_eq!(rows[1]["name"], json!("Bolt2"));
}
