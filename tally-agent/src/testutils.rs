use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use bytes::Bytes;
use parking_lot::Mutex;
use tally_config::Config;

/// A request captured by [`TestServer`].
pub struct Received {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    /// Returns the decompressed body as string.
    pub fn json(&self) -> String {
        let body = tally_common::gzip::decompress(&self.body, 1 << 20).unwrap();
        String::from_utf8(body).unwrap()
    }
}

#[derive(Default)]
struct Inner {
    received: Mutex<Vec<Received>>,
    statuses: Mutex<VecDeque<StatusCode>>,
}

/// A local ingest endpoint that records all batches and replies with scripted statuses.
///
/// Once the scripted statuses are used up, every request is answered with `200 OK`.
#[derive(Clone)]
pub struct TestServer {
    addr: SocketAddr,
    inner: Arc<Inner>,
}

async fn ingest(State(inner): State<Arc<Inner>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    inner.received.lock().push(Received { headers, body });
    inner.statuses.lock().pop_front().unwrap_or(StatusCode::OK)
}

impl TestServer {
    pub async fn start(statuses: &[StatusCode]) -> Self {
        let inner = Arc::new(Inner::default());
        inner.statuses.lock().extend(statuses.iter().copied());

        let app = Router::new()
            .route("/updates/", post(ingest))
            .with_state(inner.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { addr, inner }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn take_received(&self) -> Vec<Received> {
        std::mem::take(&mut *self.inner.received.lock())
    }

    pub fn config(&self, extra: serde_json::Value) -> Config {
        let mut config = serde_json::json!({
            "agent": {"address": self.addr.to_string()},
            "retry": {"delays": [10, 20, 30]},
        });

        if let (Some(config), serde_json::Value::Object(extra)) = (config.as_object_mut(), extra) {
            config.extend(extra);
        }

        Config::from_json_value(config).unwrap()
    }
}
