use std::convert::Infallible;

use axum::{extract::{FromRequestParts, Query}, http::{header::AUTHORIZATION, request::Parts, HeaderMap}};
use serde::Deserialize;

pub const GUEST_HEADER: &str = "x-guest-id";

/// Raw credential material carried by a request or socket handshake.
///
/// Headers win over query parameters; browsers cannot set headers on a
/// WebSocket upgrade, so the query is the usual source there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub token: Option<String>,
    pub guest_id: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct HandshakeQuery {
    token: Option<String>,
    guest_id: Option<String>,
}

impl Credentials {
    fn from_headers(headers: &HeaderMap) -> Self {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_owned());
        let guest_id = headers
            .get(GUEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|id| id.trim().to_owned());

        Self { token, guest_id }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Credentials {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_headers = Self::from_headers(&parts.headers);
        let query = Query::<HandshakeQuery>::try_from_uri(&parts.uri)
            .map(|Query(query)| query)
            .unwrap_or_default();

        Ok(Self {
            token: from_headers.token.or(query.token).filter(|t| !t.is_empty()),
            guest_id: from_headers.guest_id.or(query.guest_id).filter(|g| !g.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> Credentials {
        let (mut parts, ()) = request.into_parts();
        Credentials::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn reads_headers() {
        let request = Request::builder()
            .uri("/api/rooms")
            .header(AUTHORIZATION, "Bearer abc.1.ff")
            .header(GUEST_HEADER, "guest_1")
            .body(())
            .unwrap();
        assert_eq!(
            extract(request).await,
            Credentials { token: Some("abc.1.ff".into()), guest_id: Some("guest_1".into()) }
        );
    }

    #[tokio::test]
    async fn falls_back_to_query() {
        let request = Request::builder()
            .uri("/ws?token=t.2.aa&guestId=g2")
            .body(())
            .unwrap();
        assert_eq!(
            extract(request).await,
            Credentials { token: Some("t.2.aa".into()), guest_id: Some("g2".into()) }
        );
    }

    #[tokio::test]
    async fn empty_values_count_as_missing() {
        let request = Request::builder().uri("/ws?token=&guestId=").body(()).unwrap();
        assert_eq!(extract(request).await, Credentials::default());
    }
}
