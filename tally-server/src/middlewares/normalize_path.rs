use std::borrow::Cow;
use std::task::{Context, Poll};

use axum::http::{Request, Uri};
use axum::response::Response;
use once_cell::sync::Lazy;
use regex::Regex;
use tower::Service;

/// Folds redundant slashes in the request path before it reaches the router.
///
/// A request to `//update//counter/PollCount/1` is routed like `/update/counter/PollCount/1`.
/// Trailing slashes are left untouched, so `/update` and `/update/` remain distinct routes.
#[derive(Clone, Debug)]
pub struct NormalizePath<S> {
    inner: S,
}

impl<S> NormalizePath<S> {
    /// Wraps the given service.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S, I, O> Service<Request<I>> for NormalizePath<S>
where
    S: Service<Request<I>, Response = Response<O>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<I>) -> Self::Future {
        fold_duplicate_slashes(req.uri_mut());
        self.inner.call(req)
    }
}

fn fold_duplicate_slashes(uri: &mut Uri) {
    static REPLACE: Lazy<Regex> = Lazy::new(|| Regex::new("/{2,}").unwrap());

    let Cow::Owned(new_path) = REPLACE.replace_all(uri.path(), "/") else {
        return;
    };

    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path,
    };

    let mut builder = Uri::builder().path_and_query(path_and_query);
    if let Some(scheme) = uri.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = uri.authority() {
        builder = builder.authority(authority.clone());
    }

    if let Ok(new_uri) = builder.build() {
        *uri = new_uri;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(uri: &str) -> String {
        let mut uri: Uri = uri.parse().unwrap();
        fold_duplicate_slashes(&mut uri);
        uri.to_string()
    }

    #[test]
    fn test_folds_duplicate_slashes() {
        assert_eq!(fold("//update//gauge///Alloc/1"), "/update/gauge/Alloc/1");
        assert_eq!(fold("/updates//"), "/updates/");
    }

    #[test]
    fn test_keeps_clean_paths() {
        assert_eq!(fold("/value/counter/PollCount"), "/value/counter/PollCount");
        assert_eq!(fold("/update"), "/update");
    }

    #[test]
    fn test_keeps_query_and_authority() {
        assert_eq!(
            fold("http://localhost:8080//value//?pretty=1"),
            "http://localhost:8080/value/?pretty=1"
        );
    }
}
