//! Success envelope shared by every JSON endpoint

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// `{"success": true, "data": ...}` with a configurable status code
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip)]
    status: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 OK
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            status: StatusCode::OK,
        }
    }

    /// 201 Created
    pub fn created(data: T) -> Self {
        Self {
            success: true,
            data,
            status: StatusCode::CREATED,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::json;

    #[tokio::test]
    async fn envelope_wraps_data() {
        let response = ApiResponse::created(json!({"id": "b1"})).into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"success": true, "data": {"id": "b1"}}));
    }
}
