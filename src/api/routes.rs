//! API Routes
//!
//! HTTP/JSON endpoint definitions.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Account, Currency, Entry, OperationContext, Transfer, User};
use crate::error::AppError;
use crate::handlers::{
    CreateAccountCommand, CreateAccountHandler, CreateUserCommand, CreateUserHandler,
    LoginUserCommand, LoginUserHandler, TransferCommand, TransferHandler, TransferTxResult,
    UpdateUserCommand, UpdateUserHandler, DEFAULT_TRANSFER_TIMEOUT,
};
use crate::store::{Store, UserStore};
use crate::worker::TaskDistributor;

// =========================================================================
// Application state
// =========================================================================

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub users: Arc<dyn UserStore>,
    /// Absent when no broker is configured; users are then created without
    /// a verification email
    pub distributor: Option<TaskDistributor>,
    pub transfer_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, users: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            users,
            distributor: None,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
        }
    }

    pub fn with_distributor(mut self, distributor: TaskDistributor) -> Self {
        self.distributor = Some(distributor);
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
}

/// Body of `PATCH /users/:username`; omitted fields stay unchanged
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub is_email_verified: bool,
    pub password_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            full_name: user.full_name,
            email: user.email,
            is_email_verified: user.is_email_verified,
            password_changed_at: user.password_changed_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub owner: String,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsQuery {
    pub owner: String,
    #[serde(default = "default_page_id")]
    pub page_id: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page_id() -> i64 {
    1
}

fn default_page_size() -> i64 {
    10
}

/// Largest page of accounts returned at once
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub currency: Currency,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountDetailResponse {
    #[serde(flatten)]
    pub account: Account,
    pub entries: Vec<Entry>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/login", post(login_user))
        .route("/users/:username", get(get_user).patch(update_user))
        .route("/accounts", post(create_account).get(list_accounts))
        .route("/accounts/:id", get(get_account))
        .route("/transfers", post(create_transfer))
        .route("/transfers/:id", get(get_transfer))
}

// =========================================================================
// Users
// =========================================================================

/// Register a user and schedule the verification email
async fn create_user(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let mut handler = CreateUserHandler::new(state.users.clone());
    if let Some(distributor) = state.distributor.clone() {
        handler = handler.with_distributor(distributor);
    }

    let command = CreateUserCommand::new(
        request.username,
        request.full_name,
        request.email,
        request.password,
    );
    let user = handler.execute(command, &context).await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.users.get_user(&username).await?;
    Ok(Json(user.into()))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(username): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let command = UpdateUserCommand {
        username,
        full_name: request.full_name,
        email: request.email,
        password: request.password,
    };
    let user = UpdateUserHandler::new(state.users.clone())
        .execute(command, &context)
        .await?;
    Ok(Json(user.into()))
}

async fn login_user(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<LoginUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let command = LoginUserCommand::new(request.username, request.password);
    let user = LoginUserHandler::new(state.users.clone())
        .execute(command, &context)
        .await?;
    Ok(Json(user.into()))
}

// =========================================================================
// Accounts
// =========================================================================

async fn create_account(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let handler = CreateAccountHandler::new(state.store.clone());
    let account = handler
        .execute(
            CreateAccountCommand::new(request.owner, request.currency),
            &context,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// Account with its ledger entries
async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AccountDetailResponse>, AppError> {
    let account = state.store.get_account(id).await?;
    let entries = state.store.list_entries(id).await?;
    Ok(Json(AccountDetailResponse { account, entries }))
}

async fn list_accounts(
    State(state): State<AppState>,
    Query(query): Query<ListAccountsQuery>,
) -> Result<Json<Vec<Account>>, AppError> {
    if query.page_id < 1 {
        return Err(AppError::InvalidRequest("page_id must be at least 1".to_string()));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&query.page_size) {
        return Err(AppError::InvalidRequest(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let offset = (query.page_id - 1)
        .checked_mul(query.page_size)
        .ok_or_else(|| AppError::InvalidRequest("page_id is out of range".to_string()))?;
    let accounts = state
        .store
        .list_accounts(&query.owner, query.page_size, offset)
        .await?;
    Ok(Json(accounts))
}

// =========================================================================
// Transfers
// =========================================================================

async fn create_transfer(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferTxResult>, AppError> {
    let handler =
        TransferHandler::new(state.store.clone()).with_timeout(state.transfer_timeout);

    let command = TransferCommand::new(
        request.from_account_id,
        request.to_account_id,
        request.amount,
    )
    .with_currency(request.currency);

    let result = handler.execute(command, &context).await?;
    Ok(Json(result))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(state.store.get_transfer(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_request_deserialize() {
        let json = r#"{
            "from_account_id": 1,
            "to_account_id": 2,
            "amount": 100,
            "currency": "USD"
        }"#;

        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.amount, 100);
        assert_eq!(request.currency, Currency::Usd);
    }

    #[test]
    fn test_transfer_request_rejects_unknown_currency() {
        let json = r#"{"from_account_id": 1, "to_account_id": 2, "amount": 1, "currency": "JPY"}"#;
        assert!(serde_json::from_str::<TransferRequest>(json).is_err());
    }

    #[test]
    fn test_update_user_request_fields_are_optional() {
        let request: UpdateUserRequest =
            serde_json::from_str(r#"{"full_name": "Alice Pleasance"}"#).unwrap();
        assert_eq!(request.full_name.as_deref(), Some("Alice Pleasance"));
        assert!(request.email.is_none());
        assert!(request.password.is_none());
    }

    #[test]
    fn test_list_accounts_query_defaults() {
        let query: ListAccountsQuery = serde_json::from_str(r#"{"owner": "alice"}"#).unwrap();
        assert_eq!(query.page_id, 1);
        assert_eq!(query.page_size, 10);
    }
}
