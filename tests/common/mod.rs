#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use haven_api::auth::hash_password;
use haven_api::config::AppConfig;
use haven_api::database::UserRecord;
use haven_api::types::Role;
use haven_api::{app, AppState};

pub const PASSWORD: &str = "correct horse battery staple";

static SERVER: OnceLock<TestServer> = OnceLock::new();
static PASSWORD_HASH: OnceLock<String> = OnceLock::new();

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // In-memory stores: the binary only uses PostgreSQL when DATABASE_URL is set
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_haven-api"));
        cmd.env("HAVEN_API_PORT", port.to_string())
            .env("APP_ENV", "development")
            .env_remove("DATABASE_URL")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == reqwest::StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// One parsed response from the in-process router.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

/// The full router over in-memory stores, driven without a socket.
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::development())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let state = AppState::in_memory(config);
        let router = app(state.clone());
        Self { state, router }
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            app: self,
            method,
            path: path.to_string(),
            token: None,
            ip: None,
            content_type: Some("application/json".to_string()),
            body: None,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    /// Insert an active user whose password is [`PASSWORD`].
    pub async fn seed_user(&self, role: Role, tenant_id: Option<Uuid>) -> UserRecord {
        let hash = PASSWORD_HASH.get_or_init(|| hash_password(PASSWORD).expect("hash password"));
        let email = format!("{}-{}@example.com", role, Uuid::new_v4().simple());
        let user = UserRecord::new(tenant_id, &email, hash, role, "Test", "User");
        self.state.stores.users.create(&user).await.expect("seed user");
        user
    }

    /// Sign in and return the bearer token.
    pub async fn login(&self, user: &UserRecord) -> String {
        let res = self
            .post("/auth/login")
            .json(serde_json::json!({ "email": user.email, "password": PASSWORD }))
            .send()
            .await;
        assert_eq!(res.status, StatusCode::OK, "login failed: {}", res.body);
        res.data()["token"].as_str().expect("token in login response").to_string()
    }
}

pub struct RequestBuilder<'a> {
    app: &'a TestApp,
    method: Method,
    path: String,
    token: Option<String>,
    ip: Option<String>,
    content_type: Option<String>,
    body: Option<String>,
}

impl RequestBuilder<'_> {
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Client address, passed as `X-Forwarded-For` (trusted in development).
    pub fn from_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Raw body text, sent with whatever content type is set.
    pub fn text(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Replace the default `application/json` content type of a body.
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn without_content_type(mut self) -> Self {
        self.content_type = None;
        self
    }

    pub async fn send(self) -> TestResponse {
        let mut builder = Request::builder().method(self.method).uri(&self.path);
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(ip) = &self.ip {
            builder = builder.header("x-forwarded-for", ip);
        }
        let request = match self.body {
            Some(body) => {
                if let Some(content_type) = &self.content_type {
                    builder = builder.header(header::CONTENT_TYPE, content_type);
                }
                builder.body(Body::from(body))
            }
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let response = self.app.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, headers, body }
    }
}
