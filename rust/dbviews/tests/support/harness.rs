use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use dbviews::{
    auth::Credentials,
    config::AppConfig,
    db,
    executor::QueryExecutor,
    notify::{Notification, Notifier, Notify},
    registry::ViewRegistry,
    server::Server,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{env, future::Future, sync::Arc, sync::Once, time::Duration};
use tokio::time::{sleep, Instant};
use tokio_postgres::NoTls;
use tower::ServiceExt;

pub const USERNAME: &str = "report";
pub const PASSWORD: &str = "s3cret";

/// Nothing listens on port 1, so every checkout fails fast.
const UNREACHABLE_DATABASE_URL: &str = "postgres://views@127.0.0.1:1/views";

static TRACING_INIT: Once = Once::new();

pub const VIEWS: &str = r#"{
    "sales": {
        "query": "SELECT id, region, amount, sold_at FROM views_test_sales WHERE sold_at BETWEEN {parameters[0]} AND {parameters[1]}",
        "parameters": ["start", "end"],
        "optional_parameters": ["not_before"],
        "optional_query": "AND sold_at >= {optionals}",
        "extra_query": "ORDER BY id"
    },
    "recent": {
        "query": "SELECT id, sold_at FROM views_test_sales WHERE sold_at > {parameters} ORDER BY id",
        "parameters": ["from"]
    },
    "everything": {
        "query": "SELECT id FROM views_test_sales ORDER BY id",
        "parameters": []
    },
    "series": {
        "query": "SELECT g AS n FROM generate_series(1, 100000) AS g",
        "parameters": []
    },
    "fragile": {
        "query": "SELECT 10 / (3 - g) AS ratio FROM generate_series(1, 5) AS g",
        "parameters": []
    }
}"#;

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Background alerts land shortly after the response.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.sent.lock().len() < count && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub struct ViewsTestHarness {
    router: Router,
    pub executor: QueryExecutor,
    pub slots: usize,
    pub notifications: Arc<RecordingNotifier>,
}

impl ViewsTestHarness {
    /// Router over `VIEWS` whose database can never be reached.
    pub fn offline(credentials: Option<Credentials>) -> Self {
        init_tracing();
        let mut config = AppConfig::embedded(UNREACHABLE_DATABASE_URL.to_string());
        config.connect_timeout = Duration::from_millis(250);
        config.credentials = credentials;
        let pool = db::lazy_pool(&config).expect("lazy pool should build");
        Self::build(config, pool)
    }

    fn build(config: AppConfig, pool: db::PgPool) -> Self {
        let registry = ViewRegistry::from_json(VIEWS).expect("test views should load");
        let notifications = Arc::new(RecordingNotifier::default());
        let notifier = Notifier::new(notifications.clone(), Duration::from_secs(300));
        let slots = config.max_concurrent_queries;
        let server = Server::from_parts(config, registry, pool, notifier);

        Self {
            router: server.router(),
            executor: server.executor().clone(),
            slots,
            notifications,
        }
    }

    /// Polls until every query slot has been handed back.
    pub async fn wait_for_idle_slots(&self) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.executor.available_slots() < self.slots && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        self.executor.available_slots()
    }

    pub async fn get(&self, uri: &str) -> http::Response<Body> {
        self.send(Request::builder().uri(uri)).await
    }

    pub async fn get_with_basic(
        &self,
        uri: &str,
        user: &str,
        pass: &str,
    ) -> http::Response<Body> {
        let token = STANDARD.encode(format!("{user}:{pass}"));
        self.send(
            Request::builder()
                .uri(uri)
                .header(http::header::AUTHORIZATION, format!("Basic {token}")),
        )
        .await
    }

    pub async fn get_gzip(&self, uri: &str) -> http::Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header(http::header::ACCEPT_ENCODING, "gzip"),
        )
        .await
    }

    async fn send(&self, builder: http::request::Builder) -> http::Response<Body> {
        let request = builder
            .method("GET")
            .body(Body::empty())
            .expect("request should build");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }
}

/// Runs `test` against a harness backed by `VIEWS_TEST_DATABASE_URL`, with
/// the `views_test_sales` fixture freshly seeded.
pub async fn with_views_harness<F, Fut>(test: F)
where
    F: FnOnce(ViewsTestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    init_tracing();

    let database_url = match env::var("VIEWS_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!("[dbviews-test] skipping database harness: VIEWS_TEST_DATABASE_URL is not set");
            return;
        }
    };

    seed_fixture(&database_url)
        .await
        .expect("failed to seed views_test_sales fixture");

    let mut config = AppConfig::embedded(database_url);
    config.connect_timeout = Duration::from_secs(5);
    let pool = db::connect_pool(&config)
        .await
        .expect("failed to build database pool");

    test(ViewsTestHarness::build(config, pool)).await;
}

async fn seed_fixture(database_url: &str) -> anyhow::Result<()> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .context("connect to VIEWS_TEST_DATABASE_URL")?;
    let handle = tokio::spawn(connection);

    client
        .batch_execute(
            "DROP TABLE IF EXISTS views_test_sales;
             CREATE TABLE views_test_sales (
                 id integer PRIMARY KEY,
                 region text NOT NULL,
                 amount numeric(12, 2),
                 sold_at timestamp NOT NULL
             );
             INSERT INTO views_test_sales (id, region, amount, sold_at) VALUES
                 (1, 'north', 120.50, '2024-01-05 09:30:00'),
                 (2, 'south', 75.00, '2024-01-20 14:00:00'),
                 (3, 'east', NULL, '2024-02-02 08:15:00'),
                 (4, 'west', 310.25, '2024-03-11 17:45:00');",
        )
        .await
        .context("seed views_test_sales")?;

    drop(client);
    let _ = handle.await;
    Ok(())
}

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub async fn read_body(response: http::Response<Body>) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, headers, bytes.to_vec())
}

/// Reads a streamed body until it ends or fails, keeping what arrived.
pub async fn read_until_error(response: http::Response<Body>) -> (Vec<u8>, Option<axum::Error>) {
    let mut stream = response.into_body().into_data_stream();
    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => received.extend_from_slice(&bytes),
            Err(err) => return (received, Some(err)),
        }
    }
    (received, None)
}

pub async fn read_text(response: http::Response<Body>) -> (StatusCode, String) {
    let (status, _, bytes) = read_body(response).await;
    (
        status,
        String::from_utf8(bytes).expect("response body should be UTF-8"),
    )
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let (status, _, bytes) = read_body(response).await;
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}
