//! Service tests against a real Postgres.
//!
//! Each test creates a fresh database on the server named in the `database`
//! section of `configuration.yaml` (overridable with `APP_DATABASE__*`).
//! Run with: cargo test --test postgres_store -- --ignored

use account_service::auth::{AuthService, Purpose, RegisterInput, TokenPair};
use account_service::configuration::{get_configuration, DatabaseSettings};
use account_service::context::RequestContext;
use account_service::email_client::InMemoryMailer;
use account_service::error::{AppError, AuthError, ConflictError};
use account_service::events::BroadcastPublisher;
use account_service::store::PgStore;
use sqlx::{Connection, Executor, PgConnection, PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

const PASSWORD: &str = "pw123456";
const ROUNDS: usize = 10;

pub struct TestApp {
    pub service: AuthService,
    pub mailer: Arc<InMemoryMailer>,
    pub db_pool: PgPool,
}

async fn spawn_app() -> TestApp {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = Uuid::new_v4().to_string();
    configuration.account.bcrypt_cost = 4;
    let db_pool = configure_database(&configuration.database).await;

    let mailer = Arc::new(InMemoryMailer::new());
    let service = AuthService::new(
        &configuration,
        Arc::new(PgStore::new(db_pool.clone())),
        mailer.clone(),
        Arc::new(BroadcastPublisher::default()),
    );

    TestApp {
        service,
        mailer,
        db_pool,
    }
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

fn ctx() -> RequestContext {
    RequestContext::new("postgres-test")
}

impl TestApp {
    async fn register(&self, email: &str) -> Result<(), AppError> {
        self.service
            .register(
                &ctx(),
                RegisterInput {
                    email: email.to_string(),
                    password: PASSWORD.to_string(),
                    name: "A".to_string(),
                },
            )
            .await
            .map(|_| ())
    }

    async fn send_code(&self, email: &str) -> String {
        self.service
            .send_verification_email(&ctx(), email)
            .await
            .expect("Failed to send verification email");
        self.mailer
            .last_code_for(email)
            .expect("No verification code dispatched")
    }

    async fn active_account_tokens(&self, email: &str) -> TokenPair {
        self.register(email).await.expect("Failed to register");
        let code = self.send_code(email).await;
        self.service
            .verify_email(&ctx(), email, &code)
            .await
            .expect("Failed to verify email");
        self.service
            .login(&ctx(), email, PASSWORD)
            .await
            .expect("Failed to log in")
    }

    async fn count(&self, query: &str) -> i64 {
        sqlx::query(query)
            .fetch_one(&self.db_pool)
            .await
            .expect("Failed to run count query")
            .get(0)
    }
}

/// Splits two racing outcomes into (winner, loser's error)
fn one_winner<T: std::fmt::Debug>(
    a: Result<T, AppError>,
    b: Result<T, AppError>,
) -> (T, AppError) {
    match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one success, got {:?}", other),
    }
}

// --- Registration ---

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn registration_persists_pending_account_with_default_role() {
    let app = spawn_app().await;

    app.register("a@x.com").await.unwrap();

    let row = sqlx::query(
        r#"
        SELECT a.status, r.code
        FROM accounts a
        JOIN account_roles ar ON ar.account_id = a.id
        JOIN roles r ON r.id = ar.role_id
        WHERE a.email = 'a@x.com'
        "#,
    )
    .fetch_one(&app.db_pool)
    .await
    .expect("Failed to fetch saved account.");

    assert_eq!(row.get::<String, _>("status"), "PENDING");
    assert_eq!(row.get::<String, _>("code"), "CUSTOMER");
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn sequential_duplicate_registration_conflicts() {
    let app = spawn_app().await;
    app.register("a@x.com").await.unwrap();

    let err = app.register("A@X.com").await.unwrap_err();

    assert!(matches!(err, AppError::Conflict(ConflictError::EmailTaken)));
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn concurrent_registrations_with_one_email_yield_a_conflict() {
    let app = spawn_app().await;

    for round in 0..ROUNDS {
        let email = format!("race{}@x.com", round);
        let (a, b) = tokio::join!(app.register(&email), app.register(&email));

        let ((), lost) = one_winner(a, b);
        assert!(
            matches!(lost, AppError::Conflict(ConflictError::EmailTaken)),
            "round {}: loser got {:?}",
            round,
            lost
        );
    }

    assert_eq!(app.count("SELECT COUNT(*) FROM accounts").await, ROUNDS as i64);
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn concurrent_first_registrations_share_one_role() {
    let app = spawn_app().await;

    let (a, b) = tokio::join!(app.register("a@x.com"), app.register("b@x.com"));

    a.unwrap();
    b.unwrap();
    assert_eq!(app.count("SELECT COUNT(*) FROM roles").await, 1);
    assert_eq!(app.count("SELECT COUNT(*) FROM account_roles").await, 2);
}

// --- Refresh rotation ---

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn rotation_revokes_and_links_the_presented_record() {
    let app = spawn_app().await;
    let tokens = app.active_account_tokens("a@x.com").await;

    app.service
        .refresh_access_token(&ctx(), &tokens.refresh_token)
        .await
        .unwrap();
    let err = app
        .service
        .refresh_access_token(&ctx(), &tokens.refresh_token)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Auth(AuthError::RefreshTokenRevokedOrExpired)));
    assert_eq!(
        app.count("SELECT COUNT(*) FROM refresh_tokens WHERE revoked AND replaced_by_jti IS NOT NULL")
            .await,
        1
    );
    assert_eq!(
        app.count("SELECT COUNT(*) FROM refresh_tokens WHERE NOT revoked").await,
        1
    );
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn concurrent_rotations_of_one_token_yield_one_successor() {
    let app = spawn_app().await;
    let mut current = app.active_account_tokens("a@x.com").await.refresh_token;

    for round in 0..ROUNDS {
        let (ctx_a, ctx_b) = (ctx(), ctx());
        let (a, b) = tokio::join!(
            app.service.refresh_access_token(&ctx_a, &current),
            app.service.refresh_access_token(&ctx_b, &current)
        );

        let (won, lost) = one_winner(a, b);
        assert!(
            matches!(lost, AppError::Auth(AuthError::RefreshTokenRevokedOrExpired)),
            "round {}: loser got {:?}",
            round,
            lost
        );
        current = won.refresh_token;
    }

    assert_eq!(
        app.count("SELECT COUNT(*) FROM refresh_tokens WHERE NOT revoked").await,
        1
    );
    assert_eq!(
        app.count("SELECT COUNT(*) FROM refresh_tokens").await,
        ROUNDS as i64 + 1
    );
}

// --- Single-use codes ---

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn resending_a_code_keeps_one_stored_row() {
    let app = spawn_app().await;
    app.register("a@x.com").await.unwrap();

    app.send_code("a@x.com").await;
    let latest = app.send_code("a@x.com").await;

    assert_eq!(app.count("SELECT COUNT(*) FROM single_use_tokens").await, 1);
    app.service.verify_email(&ctx(), "a@x.com", &latest).await.unwrap();
    assert_eq!(app.count("SELECT COUNT(*) FROM single_use_tokens").await, 0);
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn concurrent_redemptions_of_one_code_succeed_once() {
    let app = spawn_app().await;
    app.register("a@x.com").await.unwrap();
    let code = app.send_code("a@x.com").await;

    let (ctx_a, ctx_b) = (ctx(), ctx());
    let (a, b) = tokio::join!(
        app.service.verify_email(&ctx_a, "a@x.com", &code),
        app.service.verify_email(&ctx_b, "a@x.com", &code)
    );

    let ((), lost) = one_winner(a, b);
    assert!(matches!(
        lost,
        AppError::Auth(AuthError::InvalidCode(Purpose::Verify))
    ));
    assert_eq!(
        app.count("SELECT COUNT(*) FROM accounts WHERE status = 'ACTIVE'").await,
        1
    );
}

#[tokio::test]
#[ignore = "Requires a running Postgres"]
async fn password_reset_replaces_the_stored_credential() {
    let app = spawn_app().await;
    app.active_account_tokens("a@x.com").await;

    app.service
        .request_password_reset(&ctx(), "a@x.com")
        .await
        .unwrap();
    let token = app.mailer.last_code_for("a@x.com").unwrap();
    app.service
        .perform_password_reset(&ctx(), "a@x.com", &token, "newpw123")
        .await
        .unwrap();

    let err = app.service.login(&ctx(), "a@x.com", PASSWORD).await.unwrap_err();
    assert!(matches!(err, AppError::Auth(AuthError::InvalidCredentials)));
    assert!(app.service.login(&ctx(), "a@x.com", "newpw123").await.is_ok());
}
