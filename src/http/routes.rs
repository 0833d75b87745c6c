//! OData HTTP Routes
//!
//! Entity set endpoints, the metadata document and `$batch`, all relative
//! to the configured base path.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, OriginalUri, Path, State},
    http::{header::HOST, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::response::{json_response, text_response, xml_response, ODATA_UNIMPLEMENTED};
use super::state::ODataState;
use crate::batch::{cast_id, BatchRequest};
use crate::config::IDENTITY_FIELD;
use crate::delta::delta_link;
use crate::errors::{ODataError, ODataResult};
use crate::query::QueryParams;

// ==================
// OData Routes
// ==================

/// Create the OData router; nest it under the base path
pub fn odata_routes(state: Arc<ODataState>) -> Router {
    Router::new()
        .route("/$metadata", get(metadata_handler))
        .route("/$batch", post(batch_handler))
        .route("/:set", get(query_handler).post(create_handler))
        .route("/:set/$count", get(count_handler))
        .route("/:set/:id", patch(update_handler))
        .with_state(state)
}

// ==================
// Helper Functions
// ==================

/// `{scheme}://{host}` as seen by the client
fn request_origin(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

fn body_object(body: Value) -> ODataResult<serde_json::Map<String, Value>> {
    match body {
        Value::Object(fields) => Ok(fields),
        _ => Err(ODataError::bad_request("Request body must be a JSON object")),
    }
}

// ==================
// Entity Set Handlers
// ==================

/// Query, delta initiation (`$delta=true`) or delta resolution (`$deltatoken`)
async fn query_handler(
    State(state): State<Arc<ODataState>>,
    Path(set): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> ODataResult<Response> {
    let entity = state.entity_set(&set)?;
    let params = QueryParams::from_url(&uri.to_string());
    let origin = request_origin(&headers);

    if params
        .get("$delta")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        let checkpoint = state.delta.initiate(None).await?;
        let base = format!("{}{}/{}", origin, state.base_path, set);
        let link = delta_link(&base, &checkpoint.token_id);
        return Ok(json_response(
            StatusCode::OK,
            &json!({ "@odata.deltaLink": link }),
        ));
    }

    if let Some(token) = params.get_non_empty("$deltatoken") {
        let changed = state
            .delta
            .resolve(token, entity.collection.as_ref())
            .await?;
        return Ok(json_response(StatusCode::OK, &json!({ "value": changed })));
    }

    let query = state.parser.parse_params(&params);
    let config = entity
        .config
        .execution_config(Some(format!("{}{}", origin, uri.path())));
    let mut envelope = state
        .executor
        .execute(&query, entity.collection.as_ref(), &config)
        .await?;
    if let Some(coercer) = entity.date_coercer() {
        coercer.coerce(&mut envelope.rows);
    }

    let mut response = json_response(StatusCode::OK, &envelope);
    if !query.unimplemented_functions.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&query.unimplemented_functions.join(",")) {
            response.headers_mut().insert(ODATA_UNIMPLEMENTED, value);
        }
    }
    Ok(response)
}

/// Matching row count as plain text, regardless of `$count`
async fn count_handler(
    State(state): State<Arc<ODataState>>,
    Path(set): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> ODataResult<Response> {
    let entity = state.entity_set(&set)?;
    let mut query = state.parser.parse_params(&QueryParams::from_url(&uri.to_string()));
    query.count = Some(true);

    let envelope = state
        .executor
        .execute(&query, entity.collection.as_ref(), &entity.config.execution_config(None))
        .await?;
    Ok(text_response(
        StatusCode::OK,
        envelope.count.unwrap_or(0).to_string(),
    ))
}

async fn create_handler(
    State(state): State<Arc<ODataState>>,
    Path(set): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ODataResult<Response> {
    let entity = state.entity_set(&set)?;
    let Json(body) = body?;
    let mut doc = body_object(body)?;
    state.delta.change_stamp().stamp(&mut doc);

    let stored = entity.collection.insert_one(Value::Object(doc)).await?;
    Ok(json_response(StatusCode::CREATED, &stored))
}

/// `$set` the body onto the row whose key matches; numeric-looking keys match numbers
async fn update_handler(
    State(state): State<Arc<ODataState>>,
    Path((set, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> ODataResult<Response> {
    let entity = state.entity_set(&set)?;
    let Json(body) = body?;
    let key_field = entity.key_field();
    let mut fields = body_object(body)?;
    fields.remove(IDENTITY_FIELD);
    fields.remove(&key_field);
    state.delta.change_stamp().stamp(&mut fields);

    let filter = json!({ key_field: cast_id(&id) });
    let matched = entity.collection.update_one(&filter, fields).await?;
    if matched == 0 {
        return Err(ODataError::not_found(format!("No {} with key {}", set, id)));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ==================
// Service Handlers
// ==================

async fn metadata_handler(State(state): State<Arc<ODataState>>) -> Response {
    xml_response(state.metadata.to_xml())
}

async fn batch_handler(
    State(state): State<Arc<ODataState>>,
    request: Result<Json<BatchRequest>, JsonRejection>,
) -> ODataResult<Response> {
    let Json(request) = request?;
    let response = state.batch.process(request).await;
    Ok(json_response(StatusCode::OK, &response))
}
