use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use crate::model::CallerContext;

/// Axum extractor for CallerContext from request headers
///
/// - X-User-Id: caller identifier
/// - X-Allow-Released-Changes: `true` when the authorization layer lets the
///   caller modify released operations
///
/// Without an X-User-Id header the anonymous caller is used.
#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let allow_released_changes = match extract_header_value(headers, "x-allow-released-changes")
        {
            Some(value) => parse_flag(&value).ok_or(StatusCode::BAD_REQUEST)?,
            None => false,
        };

        match extract_header_value(headers, "x-user-id") {
            Some(user_id) => Ok(CallerContext::with_released_changes(
                user_id,
                allow_released_changes,
            )),
            None => Ok(CallerContext {
                allow_released_changes,
                ..CallerContext::anonymous()
            }),
        }
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<CallerContext, StatusCode> {
        let (mut parts, _) = request.into_parts();
        CallerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_caller_context_extraction() {
        let request = Request::builder()
            .header("x-user-id", "test-user-123")
            .header("x-allow-released-changes", "true")
            .body(())
            .unwrap();

        let caller = extract(request).await.unwrap();
        assert_eq!(caller.user_id, "test-user-123");
        assert!(caller.allow_released_changes);
    }

    #[tokio::test]
    async fn test_missing_headers_yield_anonymous_caller() {
        let caller = extract(Request::builder().body(()).unwrap()).await.unwrap();
        assert_eq!(caller, CallerContext::anonymous());
    }

    #[tokio::test]
    async fn test_malformed_flag_is_rejected() {
        let request = Request::builder()
            .header("x-allow-released-changes", "maybe")
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap_err(), StatusCode::BAD_REQUEST);
    }
}
