/// Success envelope shared by every JSON endpoint
///
/// ```json
/// { "success": true, "data": { ... }, "pagination": { ... }, "message": "..." }
/// ```
///
/// `pagination` and `message` are omitted when empty.

use axum::{http::StatusCode, Json};
use serde::Serialize;

use crate::pagination::PageInfo;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PageInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `201 Created` with the envelope
pub type Created<T> = (StatusCode, Json<ApiResponse<T>>);

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            pagination: None,
            message: None,
        })
    }

    pub fn paginated(data: T, pagination: PageInfo) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            pagination: Some(pagination),
            message: None,
        })
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            pagination: None,
            message: Some(message.into()),
        })
    }

    pub fn created(data: T) -> Created<T> {
        (StatusCode::CREATED, Self::ok(data))
    }
}

/// Envelope with no payload, for acknowledgements such as logout
pub fn message(text: impl Into<String>) -> Json<ApiResponse<Option<()>>> {
    ApiResponse::with_message(None, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_omits_empty_fields() {
        let Json(body) = ApiResponse::ok(json!({ "id": 1 }));
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "success": true, "data": { "id": 1 } })
        );
    }

    #[test]
    fn test_envelope_with_pagination() {
        let Json(body) = ApiResponse::paginated(vec![1, 2], PageInfo::new(2, 2, 5));
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["pagination"]["total"], 5);
        assert_eq!(value["pagination"]["pages"], 3);
        assert_eq!(value["pagination"]["page"], 2);
    }

    #[test]
    fn test_message_only() {
        let Json(body) = message("Logged out");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "success": true, "data": null, "message": "Logged out" })
        );
    }
}
