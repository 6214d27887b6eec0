//! JSON envelope shared by the collector API and its clients

use serde::{Deserialize, Serialize};

/// JSON response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Success flag
    pub success: bool,
    /// Response data
    pub data: Option<T>,
    /// Error info if failed
    pub error: Option<ApiErrorBody>,
}

impl<T> ApiResponse<T> {
    /// Create successful response
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create error response
    pub fn error(code: u32, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code,
                message: message.into(),
                details,
            }),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Error code
    pub code: u32,
    /// Error message
    pub message: String,
    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let resp = ApiResponse::success(7u32);
        assert!(resp.success);
        assert_eq!(resp.data, Some(7));
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_error_envelope() {
        let resp: ApiResponse<u32> = ApiResponse::error(503, "store busy", None);
        assert!(!resp.success);
        assert!(resp.data.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, 503);
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let resp: ApiResponse<String> =
            ApiResponse::error(400, "invalid org id", Some("charset".to_string()));
        let json = serde_json::to_string(&resp).unwrap();
        let back: ApiResponse<String> = serde_json::from_str(&json).unwrap();
        assert!(!back.success);
        assert_eq!(back.error.unwrap().message, "invalid org id");
    }
}
