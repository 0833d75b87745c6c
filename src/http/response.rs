//! OData response helpers

use axum::extract::rejection::JsonRejection;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::ODataError;

/// Protocol version header carried by every response
pub const ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");

/// Advisory list of detected but unsupported filter functions
pub const ODATA_UNIMPLEMENTED: HeaderName = HeaderName::from_static("x-odata-unimplemented");

/// Stamp `OData-Version: 4.0` onto a response
pub async fn with_odata_version(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(ODATA_VERSION, HeaderValue::from_static("4.0"));
    response
}

/// JSON body with an explicit status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_value(body) {
        Ok(value) => (status, Json(value)).into_response(),
        Err(e) => ODataError::server(e.to_string()).into_response(),
    }
}

/// `text/plain` body
pub fn text_response(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

/// `application/xml` body
pub fn xml_response(body: String) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "application/xml")], body).into_response()
}

impl IntoResponse for ODataError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.to_body())).into_response()
    }
}

impl From<JsonRejection> for ODataError {
    fn from(rejection: JsonRejection) -> Self {
        ODataError::bad_request(rejection.body_text())
    }
}

/// Any path no route matches
pub async fn unmatched_route() -> ODataError {
    ODataError::not_found("Resource not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = with_odata_version(ODataError::bad_request("nope").into_response()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get(ODATA_VERSION).unwrap(), "4.0");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_unmatched_route_is_not_found() {
        let response = unmatched_route().await.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::OK, "3".to_string());
        assert!(response
            .headers()
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }
}
