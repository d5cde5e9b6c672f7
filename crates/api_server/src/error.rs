use axum::http::StatusCode;

use torrent_node_core::NodeError;

pub const CODE_INVALID_PARAMS: i32 = -32602;
pub const CODE_INTERNAL: i32 = -32603;

/// HTTP status and wire error code for a failed request: user mistakes are
/// 400/-32602, everything else (including lookups that found nothing) is
/// 500/-32603.
pub fn classify(error: &NodeError) -> (StatusCode, i32) {
    match error {
        NodeError::User(_) => (StatusCode::BAD_REQUEST, CODE_INVALID_PARAMS),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_bad_requests() {
        let (status, code) = classify(&NodeError::User("hash field not found".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, CODE_INVALID_PARAMS);

        let (status, code) = classify(&NodeError::NotFound("block 5".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, CODE_INTERNAL);
    }
}
