use account_service::auth::AuthService;
use account_service::configuration::{
    AccountSettings, ApplicationSettings, DatabaseSettings, EmailSettings, JwtSettings, Settings,
    StorageBackend,
};
use account_service::email_client::InMemoryMailer;
use account_service::events::BroadcastPublisher;
use account_service::startup::run;
use account_service::store::InMemoryStore;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub mailer: Arc<InMemoryMailer>,
    pub client: reqwest::Client,
}

fn test_settings() -> Settings {
    Settings {
        application: ApplicationSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseSettings {
            backend: StorageBackend::Memory,
            ..DatabaseSettings::default()
        },
        jwt: JwtSettings {
            secret: "integration-test-secret-0123456789abcdef".to_string(),
            access_token_expiry: 3600,
            refresh_token_expiry: 604_800,
            issuer: "account-service".to_string(),
        },
        account: AccountSettings {
            bcrypt_cost: 4,
            ..AccountSettings::default()
        },
        email: EmailSettings::default(),
    }
}

fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let mailer = Arc::new(InMemoryMailer::new());
    let service = AuthService::new(
        &test_settings(),
        Arc::new(InMemoryStore::new()),
        mailer.clone(),
        Arc::new(BroadcastPublisher::default()),
    );

    let server = run(listener, service).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        mailer,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, email: &str, password: &str) -> reqwest::Response {
        self.post(
            "/auth/register",
            &json!({ "email": email, "password": password, "name": "John Doe" }),
        )
        .await
    }

    async fn verify(&self, email: &str) {
        let response = self.post("/auth/verify/send", &json!({ "email": email })).await;
        assert_eq!(200, response.status().as_u16());

        let code = self.mailer.last_code_for(email).expect("No code dispatched");
        let response = self
            .post("/auth/verify", &json!({ "email": email, "code": code }))
            .await;
        assert_eq!(200, response.status().as_u16());
    }

    async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.post("/auth/login", &json!({ "email": email, "password": password }))
            .await
    }

    async fn active_account_tokens(&self, email: &str) -> Value {
        assert_eq!(201, self.register(email, "SecurePass123").await.status().as_u16());
        self.verify(email).await;
        let response = self.login(email, "SecurePass123").await;
        assert_eq!(200, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }
}

async fn error_code(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Failed to parse error body");
    body["code"].as_str().unwrap_or_default().to_string()
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_with_pending_profile() {
    let app = spawn_app();

    let response = app.register("john@example.com", "SecurePass123").await;

    assert_eq!(201, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["email"], "john@example.com");
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["roles"], json!(["CUSTOMER"]));
    assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app();
    app.register("duplicate@example.com", "SecurePass123").await;

    let response = app.register("Duplicate@Example.com", "SecurePass123").await;

    assert_eq!(409, response.status().as_u16());
    assert_eq!(error_code(response).await, "EMAIL_TAKEN");
}

#[tokio::test]
async fn register_returns_400_for_invalid_data() {
    let app = spawn_app();
    let test_cases = vec![
        (json!({"name": "Test", "email": "invalid-email", "password": "SecurePass123"}), "invalid email"),
        (json!({"name": "Test", "email": "test@example.com", "password": "short"}), "short password"),
        (json!({"name": "", "email": "test@example.com", "password": "SecurePass123"}), "empty name"),
        (json!({"email": "test@example.com"}), "missing fields"),
    ];

    for (body, description) in test_cases {
        let response = app.post("/auth/register", &body).await;
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
    }
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_401_for_unverified_account() {
    let app = spawn_app();
    app.register("pending@example.com", "SecurePass123").await;

    let response = app.login("pending@example.com", "SecurePass123").await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "ACCOUNT_NOT_ACTIVE");
}

#[tokio::test]
async fn login_failures_do_not_reveal_which_check_failed() {
    let app = spawn_app();
    app.active_account_tokens("known@example.com").await;

    let unknown = app.login("unknown@example.com", "SecurePass123").await;
    let wrong = app.login("known@example.com", "WrongPass123").await;

    assert_eq!(401, unknown.status().as_u16());
    assert_eq!(401, wrong.status().as_u16());
    let unknown: Value = unknown.json().await.unwrap();
    let wrong: Value = wrong.json().await.unwrap();
    assert_eq!(unknown["message"], wrong["message"]);
    assert_eq!(unknown["code"], "INVALID_CREDENTIALS");
    assert_eq!(wrong["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn login_returns_token_pair_after_verification() {
    let app = spawn_app();

    let tokens = app.active_account_tokens("login@example.com").await;

    assert!(tokens["access_token"].is_string());
    assert!(tokens["refresh_token"].is_string());
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 3600);
}

// --- Token Refresh Tests ---

#[tokio::test]
async fn refresh_rotates_and_rejects_reuse() {
    let app = spawn_app();
    let tokens = app.active_account_tokens("refresh@example.com").await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let response = app
        .post("/auth/refresh", &json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    let reuse = app
        .post("/auth/refresh", &json!({ "refresh_token": refresh_token }))
        .await;
    assert_eq!(401, reuse.status().as_u16());
    assert_eq!(error_code(reuse).await, "REVOKED_OR_EXPIRED");
}

#[tokio::test]
async fn refresh_returns_401_for_invalid_token() {
    let app = spawn_app();

    let response = app
        .post("/auth/refresh", &json!({ "refresh_token": "invalid_token_12345" }))
        .await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "INVALID_REFRESH");
}

// --- Verification and Reset Tests ---

#[tokio::test]
async fn verify_returns_401_for_wrong_code() {
    let app = spawn_app();
    app.register("verify@example.com", "SecurePass123").await;
    app.post("/auth/verify/send", &json!({ "email": "verify@example.com" }))
        .await;

    let response = app
        .post(
            "/auth/verify",
            &json!({ "email": "verify@example.com", "code": "not-the-code" }),
        )
        .await;

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "INVALID_CODE");
}

#[tokio::test]
async fn password_reset_flow() {
    let app = spawn_app();
    app.active_account_tokens("reset@example.com").await;

    let response = app
        .post("/auth/password/reset", &json!({ "email": "reset@example.com" }))
        .await;
    assert_eq!(200, response.status().as_u16());
    let token = app.mailer.last_code_for("reset@example.com").unwrap();

    let response = app
        .post(
            "/auth/password/reset/perform",
            &json!({ "email": "reset@example.com", "token": token, "new_password": "newpw123" }),
        )
        .await;
    assert_eq!(200, response.status().as_u16());

    assert_eq!(401, app.login("reset@example.com", "SecurePass123").await.status().as_u16());
    assert_eq!(200, app.login("reset@example.com", "newpw123").await.status().as_u16());
}

// --- Protected Route Tests ---

#[tokio::test]
async fn me_requires_bearer_token() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/users/me", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "MISSING_TOKEN");
}

#[tokio::test]
async fn me_rejects_refresh_token_as_bearer() {
    let app = spawn_app();
    let tokens = app.active_account_tokens("bearer@example.com").await;

    let response = app
        .client
        .get(&format!("{}/users/me", &app.address))
        .bearer_auth(tokens["refresh_token"].as_str().unwrap())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(401, response.status().as_u16());
    assert_eq!(error_code(response).await, "TOKEN_INVALID");
}

#[tokio::test]
async fn me_returns_and_updates_profile() {
    let app = spawn_app();
    let tokens = app.active_account_tokens("me@example.com").await;
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = app
        .client
        .get(&format!("{}/users/me", &app.address))
        .bearer_auth(access_token)
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
    let profile: Value = response.json().await.unwrap();
    assert_eq!(profile["email"], "me@example.com");
    assert_eq!(profile["status"], "ACTIVE");

    let response = app
        .client
        .put(&format!("{}/users/me", &app.address))
        .bearer_auth(access_token)
        .json(&json!({ "name": "Jane Doe" }))
        .send()
        .await
        .expect("Failed to execute request.");
    assert_eq!(200, response.status().as_u16());
    let profile: Value = response.json().await.unwrap();
    assert_eq!(profile["name"], "Jane Doe");
}

// --- Request Correlation ---

#[tokio::test]
async fn request_id_is_echoed() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/health_check", &app.address))
        .header("X-Request-Id", "trace-abc-123")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-abc-123"
    );
}

#[tokio::test]
async fn request_id_is_generated_when_absent() {
    let app = spawn_app();

    let response = app
        .client
        .get(&format!("{}/health_check", &app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
}
