use std::time::Duration;
use weir_server::app::build_http_app;
use weir_server::bootstrap::build_state;
use weir_server::config::ServerConfig;

/// An in-process server bound to an ephemeral port, backed by a scratch
/// data directory. Dropping it aborts the serve task; `restart` rebuilds
/// everything on the same directory to exercise persistence.
pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    config: ServerConfig,
    serve: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> TestServer {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(mutate: impl FnOnce(&mut ServerConfig)) -> TestServer {
        let tmp = tempfile::tempdir().expect("tempdir");
        let data_dir = tmp.path().join("data");
        let mut config = ServerConfig {
            data_dir: data_dir.to_string_lossy().into_owned(),
            default_retention_policy: String::new(),
            ..ServerConfig::default()
        };
        mutate(&mut config);
        let (base, serve) = serve(config.clone()).await;
        TestServer {
            base,
            client: reqwest::Client::new(),
            config,
            serve,
            _tmp: tmp,
        }
    }

    /// Stops the server and brings it back up on the same data directory.
    pub async fn restart(&mut self) {
        self.serve.abort();
        // Give the port and the sqlite handle a moment to release.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (base, serve) = serve(self.config.clone()).await;
        self.base = base;
        self.serve = serve;
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("request");
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    pub async fn patch_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let resp = self
            .client
            .patch(self.url(path))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    pub async fn delete(&self, path: &str) -> reqwest::StatusCode {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("request")
            .status()
    }

    /// Writes line-format points with second precision.
    pub async fn write(&self, db: &str, rp: &str, points: &str) {
        let status = self
            .client
            .post(self.url(&format!("/weir/v1/write?db={db}&rp={rp}&precision=s")))
            .body(points.to_string())
            .send()
            .await
            .expect("write")
            .status();
        assert_eq!(status, reqwest::StatusCode::NO_CONTENT, "write failed");
    }

    /// Polls a GET endpoint until it returns the expected body.
    pub async fn get_retry(&self, path: &str, exp: &str, retries: usize) {
        let mut last = String::new();
        for _ in 0..retries {
            let resp = self
                .client
                .get(self.url(path))
                .send()
                .await
                .expect("request");
            last = resp.text().await.unwrap_or_default();
            if last == exp {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("unexpected response for {path}:\ngot {last}\nexp {exp}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.serve.abort();
    }
}

async fn serve(config: ServerConfig) -> (String, tokio::task::JoinHandle<()>) {
    let state = build_state(config).await.expect("build state");
    let app = build_http_app(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let serve = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), serve)
}
