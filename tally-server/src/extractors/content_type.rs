use std::convert::Infallible;
use std::fmt;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;

/// The parsed `Content-Type` of a request.
///
/// A missing header is represented as `None`. A header that cannot be parsed as a media type is
/// kept as [`RequestMime::Invalid`] so handlers can reject it with `415 Unsupported Media Type`.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestMime {
    /// No `Content-Type` header was sent.
    None,
    /// A valid media type.
    Mime(mime::Mime),
    /// A header that is not a valid media type.
    Invalid(String),
}

impl RequestMime {
    /// Returns `true` for `application/json`, ignoring parameters such as `charset`.
    pub fn is_json(&self) -> bool {
        match self {
            Self::Mime(mime) => mime.essence_str() == mime::APPLICATION_JSON.essence_str(),
            _ => false,
        }
    }

    /// Returns `true` for `text/plain` or a missing header.
    pub fn is_text_or_absent(&self) -> bool {
        match self {
            Self::None => true,
            Self::Mime(mime) => mime.essence_str() == mime::TEXT_PLAIN.essence_str(),
            Self::Invalid(_) => false,
        }
    }
}

impl fmt::Display for RequestMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("<none>"),
            Self::Mime(mime) => mime.fmt(f),
            Self::Invalid(raw) => f.write_str(raw),
        }
    }
}

impl<S> FromRequestParts<S> for RequestMime
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::CONTENT_TYPE) else {
            return Ok(Self::None);
        };

        let raw = String::from_utf8_lossy(value.as_bytes()).into_owned();
        Ok(match raw.parse() {
            Ok(mime) => Self::Mime(mime),
            Err(_) => Self::Invalid(raw),
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(content_type: Option<&str>) -> RequestMime {
        let mut builder = Request::builder();
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }

        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        RequestMime::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_json_with_charset() {
        let mime = extract(Some("application/json; charset=utf-8")).await;
        assert!(mime.is_json());
        assert!(!mime.is_text_or_absent());
    }

    #[tokio::test]
    async fn test_absent_counts_as_text() {
        let mime = extract(None).await;
        assert_eq!(mime, RequestMime::None);
        assert!(mime.is_text_or_absent());
        assert!(!mime.is_json());
    }

    #[tokio::test]
    async fn test_invalid_header() {
        let mime = extract(Some("not a mime")).await;
        assert_eq!(mime, RequestMime::Invalid("not a mime".to_owned()));
        assert!(!mime.is_text_or_absent());
    }
}
