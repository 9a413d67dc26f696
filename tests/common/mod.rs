//! Common test utilities

#![allow(dead_code)]

use sqlx::PgPool;
use uuid::Uuid;

use simple_bank::db;
use simple_bank::domain::{Account, CreateAccountParams, CreateUserParams, Currency, User};
use simple_bank::store::{PgStore, Store, UserStore};
use simple_bank::worker::RedisBroker;

/// Connect to the test database.
///
/// Returns `None` (and the caller skips) when `DATABASE_URL` is unset or
/// the schema from `migrations/` has not been applied. Tests never
/// truncate tables; every test creates its own uniquely named rows.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let pool = db::connect(&database_url, 10)
        .await
        .expect("Failed to connect to DB");

    if !db::check_schema(&pool).await.expect("Failed to inspect schema") {
        eprintln!("Schema missing, apply migrations/0001_init.sql; skipping");
        return None;
    }

    Some(pool)
}

/// Redis connection for broker tests
pub struct TestBroker {
    pub broker: RedisBroker,
    pub namespace: String,
    pub redis_url: String,
}

impl TestBroker {
    /// Same broker with a smaller archive cap
    pub fn with_max_archived(mut self, max_archived: i64) -> Self {
        self.broker = self.broker.with_max_archived(max_archived);
        self
    }

    pub fn task_key(&self, id: &Uuid) -> String {
        format!("{}:t:{}", self.namespace, id)
    }

    /// Remove a key behind the broker's back
    pub async fn delete_key(&self, key: &str) {
        let client = redis::Client::open(self.redis_url.as_str()).expect("Invalid REDIS_URL");
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .expect("Failed to connect to Redis");
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .expect("Failed to delete key");
    }
}

/// Connect to the test Redis.
///
/// Returns `None` (and the caller skips) when `REDIS_URL` is unset. Every
/// call gets its own key namespace so tests never see each other's tasks.
pub async fn setup_test_broker() -> Option<TestBroker> {
    dotenvy::dotenv().ok();
    let Ok(redis_url) = std::env::var("REDIS_URL") else {
        eprintln!("REDIS_URL not set, skipping Redis test");
        return None;
    };

    let namespace = format!("simple_bank_test_{}", Uuid::new_v4().simple());
    let broker = RedisBroker::from_url(&redis_url)
        .expect("Invalid REDIS_URL")
        .with_namespace(namespace.clone());
    broker.ping().await.expect("Failed to connect to Redis");

    Some(TestBroker {
        broker,
        namespace,
        redis_url,
    })
}

/// Username that no other test run will pick
pub fn unique_username(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

pub async fn create_user(store: &PgStore, prefix: &str) -> User {
    let username = unique_username(prefix);
    store
        .create_user(CreateUserParams {
            email: format!("{}@example.com", username),
            username,
            hashed_password: "x".to_string(),
            full_name: "Test User".to_string(),
        })
        .await
        .expect("Failed to create user")
}

pub async fn create_account(store: &PgStore, owner: &str, balance: i64) -> Account {
    store
        .create_account(CreateAccountParams {
            owner: owner.to_string(),
            balance,
            currency: Currency::Usd,
        })
        .await
        .expect("Failed to create account")
}
