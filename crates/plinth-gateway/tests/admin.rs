// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Admin API and plugin namespace driven through the axum router.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use plinth_gateway::{GatewayState, router};
use plinth_hooks::{HookName, action_fn};
use plinth_plugin::NativeRuntime;
use plinth_test_utils::modules::{CountingEntry, EchoRoute};
use plinth_test_utils::{ADMIN_TOKEN, PackageBuilder, TestHost, USER_TOKEN};

const ADMIN: &str = "/api/admin/plugins";

struct Call<'a> {
    method: Method,
    uri: &'a str,
    token: Option<&'a str>,
    headers: Vec<(&'a str, &'a str)>,
    body: Body,
}

impl<'a> Call<'a> {
    fn new(method: Method, uri: &'a str) -> Self {
        Self {
            method,
            uri,
            token: None,
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    fn admin(method: Method, uri: &'a str) -> Self {
        Self::new(method, uri).token(ADMIN_TOKEN)
    }

    fn token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }

    fn header(mut self, name: &'a str, value: &'a str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    async fn send(self, app: &Router) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(token) = self.token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let response = app
            .clone()
            .oneshot(builder.body(self.body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

fn app(host: &TestHost) -> Router {
    router(GatewayState::new(Arc::clone(&host.host)))
}

fn hello_bytes() -> Vec<u8> {
    PackageBuilder::hello_world().to_bytes().unwrap()
}

async fn installed_hello_world() -> (TestHost, Router) {
    let (host, _) = TestHost::hello_world().unwrap();
    let app = app(&host);
    let (status, body) = Call::admin(Method::POST, "/api/admin/plugins?activate=true")
        .body(hello_bytes())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    (host, app)
}

#[tokio::test]
async fn admin_api_requires_admin_actor() {
    let (host, _) = TestHost::hello_world().unwrap();
    let app = app(&host);

    let (status, body) = Call::new(Method::GET, ADMIN).send(&app).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "UnauthorizedError");

    let (status, body) = Call::new(Method::GET, ADMIN).token(USER_TOKEN).send(&app).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "PermissionError");

    let (status, _) = Call::admin(Method::GET, ADMIN).send(&app).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn install_over_http_then_call_the_route() {
    let (host, app) = installed_hello_world().await;
    assert!(host.registry().is_plugin_active("hello-world").await);

    let (status, body) = Call::new(Method::GET, "/api/plugins/hello").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "message": "Hello from hello-world", "statusCode": 200})
    );
}

#[tokio::test]
async fn install_response_describes_outcome() {
    let (host, _) = TestHost::hello_world().unwrap();
    let app = app(&host);
    let (status, body) = Call::admin(Method::POST, ADMIN)
        .body(hello_bytes())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "plugin 'hello-world' 1.0.0 installed");
    assert_eq!(body["data"]["record"]["pluginId"], "hello-world");
    assert_eq!(body["data"]["record"]["isActive"], false);
    assert_eq!(body["data"]["riskLevel"], "low");

    let (status, body) = Call::admin(Method::POST, ADMIN)
        .body(hello_bytes())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "ConflictError");

    let (status, _) = Call::admin(Method::POST, "/api/admin/plugins?overwrite=true")
        .body(hello_bytes())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let (host, _) = TestHost::hello_world().unwrap();
    let (status, body) = Call::admin(Method::POST, ADMIN).send(&app(&host)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");
}

#[tokio::test]
async fn validate_reports_without_installing() {
    let (host, _) = TestHost::hello_world().unwrap();
    let app = app(&host);

    let (status, body) = Call::admin(Method::POST, "/api/admin/plugins/validate")
        .body(hello_bytes())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isValid"], true);

    let broken = PackageBuilder::hello_world()
        .remove("version")
        .to_bytes()
        .unwrap();
    let (_, body) = Call::admin(Method::POST, "/api/admin/plugins/validate")
        .body(broken)
        .send(&app)
        .await;
    assert_eq!(body["data"]["isValid"], false);
    assert!(
        body["data"]["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e.as_str().unwrap().contains("version"))
    );
    assert!(host.store().get_record("hello-world").await.unwrap().is_none());
}

#[tokio::test]
async fn list_and_get_combine_record_and_live_state() {
    let (_host, app) = installed_hello_world().await;

    let (status, body) = Call::admin(Method::GET, "/api/admin/plugins?isActive=true&limit=10")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 10);
    assert_eq!(body["data"]["items"][0]["pluginId"], "hello-world");
    assert_eq!(body["data"]["items"][0]["live"], true);

    let (_, body) = Call::admin(Method::GET, "/api/admin/plugins?isActive=false")
        .send(&app)
        .await;
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = Call::admin(Method::GET, "/api/admin/plugins/hello-world")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "installed-active");
    assert_eq!(body["data"]["routes"], json!(["GET /hello"]));

    let (status, body) = Call::admin(Method::GET, "/api/admin/plugins/missing")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFoundError");
}

#[tokio::test]
async fn deactivate_and_activate_toggle_the_route() {
    let (_host, app) = installed_hello_world().await;

    let (status, body) = Call::admin(Method::POST, "/api/admin/plugins/hello-world/deactivate")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "plugin 'hello-world' deactivated");
    assert_eq!(body["data"]["isActive"], false);

    let (status, body) = Call::new(Method::GET, "/api/plugins/hello").send(&app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UnavailableError");

    // Deactivating twice is a no-op.
    let (status, _) = Call::admin(Method::POST, "/api/admin/plugins/hello-world/deactivate")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = Call::admin(Method::POST, "/api/admin/plugins/hello-world/activate")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = Call::new(Method::GET, "/api/plugins/hello").send(&app).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn configure_merges_json_patch() {
    let (_host, app) = installed_hello_world().await;
    let uri = "/api/admin/plugins/hello-world/config";

    let (status, body) = Call::admin(Method::PUT, uri)
        .body(r#"{"greeting": "hi", "limit": 5}"#)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({"greeting": "hi", "limit": 5}));

    let (_, body) = Call::admin(Method::PUT, uri)
        .body(r#"{"limit": null}"#)
        .send(&app)
        .await;
    assert_eq!(body["data"], json!({"greeting": "hi"}));

    let (status, body) = Call::admin(Method::PUT, uri).body("not json").send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid JSON body"));

    let (status, _) = Call::admin(Method::PUT, uri).body("[1, 2]").send(&app).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn uninstall_requires_inactive_plugin() {
    let (host, app) = installed_hello_world().await;
    let uri = "/api/admin/plugins/hello-world";

    let (status, body) = Call::admin(Method::DELETE, uri).send(&app).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "ConflictError");
    assert!(host.registry().is_plugin_active("hello-world").await);

    Call::admin(Method::POST, "/api/admin/plugins/hello-world/deactivate")
        .send(&app)
        .await;
    let (status, body) = Call::admin(Method::DELETE, uri).send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "plugin 'hello-world' uninstalled");

    let (status, _) = Call::admin(Method::GET, uri).send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = Call::new(Method::GET, "/api/plugins/hello").send(&app).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plugin_requests_carry_query_body_and_client() {
    let native = NativeRuntime::new()
        .with_entry("echo", "index.wasm", Arc::new(CountingEntry::default()))
        .with_route("echo", "routes/echo.wasm", Arc::new(EchoRoute));
    let host = TestHost::builder().with_native(native).build().unwrap();
    let package = PackageBuilder::new("echo", "1.0.0")
        .route("POST", "/echo/items", "routes/echo.wasm")
        .route("GET", "/echo", "routes/echo.wasm");
    let app = app(&host);
    let (status, _) = Call::admin(Method::POST, "/api/admin/plugins?activate=true")
        .body(package.to_bytes().unwrap())
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = Call::new(Method::POST, "/api/plugins//echo/items/?page=2&q=rust")
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .body(r#"{"title": "hello"}"#)
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["path"], "/echo/items");
    assert_eq!(data["query"], json!({"page": "2", "q": "rust"}));
    assert_eq!(data["body"], json!({"title": "hello"}));
    assert_eq!(data["client"], "203.0.113.9");
    assert_eq!(data["actor"], Value::Null);

    // An authenticated actor is the client identity.
    let (_, body) = Call::new(Method::GET, "/api/plugins/echo")
        .token(USER_TOKEN)
        .send(&app)
        .await;
    assert_eq!(body["data"]["actor"], "user");
    assert_eq!(body["data"]["client"], "user");

    let (status, body) = Call::new(Method::POST, "/api/plugins/echo/items")
        .body("{broken")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");
}

#[tokio::test]
async fn unparseable_body_still_goes_through_routing_and_hooks() {
    let (host, app) = installed_hello_world().await;
    let ended: Arc<Mutex<Vec<Value>>> = Arc::default();
    let sink = Arc::clone(&ended);
    host.host
        .hooks()
        .add_action(
            HookName::RequestEnd,
            10,
            action_fn(move |payload| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(payload);
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    let (status, body) = Call::new(Method::POST, "/api/plugins/nowhere")
        .body("{broken")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFoundError");

    let (status, body) = Call::new(Method::GET, "/api/plugins/hello")
        .body("{broken")
        .send(&app)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");

    let ended = ended.lock().unwrap();
    assert_eq!(ended.len(), 2);
    assert_eq!(ended[0]["status"], 404);
    assert_eq!(ended[1]["status"], 400);
    assert_eq!(ended[1]["pluginId"], "hello-world");
}

#[tokio::test]
async fn health_reports_live_plugins() {
    let (_host, app) = installed_hello_world().await;
    let (status, body) = Call::new(Method::GET, "/health").send(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activePlugins"], 1);
    assert_eq!(body["routes"], 1);
}
