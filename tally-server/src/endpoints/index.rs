use std::fmt::{self, Write};

use axum::extract::State;
use axum::response::Html;
use tally_metrics::format_gauge;

use crate::service::ServiceState;
use crate::utils::ApiError;

/// Lists all metrics as an HTML page, gauges first.
pub async fn handle(State(state): State<ServiceState>) -> Result<Html<String>, ApiError> {
    let store = state.store();
    let gauges = store.gauges().await?;
    let counters = store.counters().await?;

    let mut html = String::from("<html><body><h1>Metrics</h1><ul>");
    for (name, value) in &gauges {
        let _ = write!(html, "<li>{}: {}</li>", Escaped(name), format_gauge(*value));
    }
    for (name, value) in &counters {
        let _ = write!(html, "<li>{}: {value}</li>", Escaped(name));
    }
    html.push_str("</ul></body></html>");

    Ok(Html(html))
}

/// Displays a string with HTML special characters replaced by entities.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0;
        while let Some(pos) = rest.find(['<', '>', '&', '"']) {
            f.write_str(&rest[..pos])?;
            f.write_str(match rest.as_bytes()[pos] {
                b'<' => "&lt;",
                b'>' => "&gt;",
                b'&' => "&amp;",
                _ => "&quot;",
            })?;
            rest = &rest[pos + 1..];
        }
        f.write_str(rest)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tally_store::MetricStore;

    use crate::endpoints::tests::{body_string, default_state, send};

    #[tokio::test]
    async fn test_listing() {
        let (state, store) = default_state();
        store.add_counter("PollCount", 7).await.unwrap();
        store.set_gauge("RandomValue", 0.5).await.unwrap();
        store.set_gauge("Alloc", 2.0).await.unwrap();

        let response = send(&state, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));

        assert_eq!(
            body_string(response).await,
            "<html><body><h1>Metrics</h1><ul>\
             <li>Alloc: 2</li><li>RandomValue: 0.5</li><li>PollCount: 7</li>\
             </ul></body></html>"
        );
    }

    #[tokio::test]
    async fn test_listing_escapes_names() {
        let (state, store) = default_state();
        store.add_counter("<b>\"x\"&y</b>", 1).await.unwrap();

        let response = send(&state, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(
            body_string(response).await,
            "<html><body><h1>Metrics</h1><ul>\
             <li>&lt;b&gt;&quot;x&quot;&amp;y&lt;/b&gt;: 1</li>\
             </ul></body></html>"
        );
    }

    #[tokio::test]
    async fn test_empty_listing() {
        let (state, _) = default_state();
        let response = send(&state, Request::get("/").body(Body::empty()).unwrap()).await;
        assert_eq!(
            body_string(response).await,
            "<html><body><h1>Metrics</h1><ul></ul></body></html>"
        );
    }
}
