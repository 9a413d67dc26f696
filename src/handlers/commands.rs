//! Command definitions
//!
//! Commands represent intentions to change the system state.

use serde::{Deserialize, Serialize};

use crate::domain::{Account, Amount, Currency, DomainError, Entry, Transfer};

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move money between two accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Amount in minor currency units
    pub amount: i64,
    /// When set, both accounts must be held in this currency
    pub currency: Option<Currency>,
}

impl TransferCommand {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency: None,
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Check the preconditions that need no storage access
    pub fn validate(&self) -> Result<Amount, DomainError> {
        if self.from_account_id == self.to_account_id {
            return Err(DomainError::SameAccountTransfer);
        }
        Ok(Amount::new(self.amount)?)
    }
}

/// Everything a committed transfer produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

// =========================================================================
// CreateUserCommand
// =========================================================================

/// Command to register a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserCommand {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
}

impl CreateUserCommand {
    pub fn new(username: String, full_name: String, email: String, password: String) -> Self {
        Self {
            username,
            full_name,
            email,
            password,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_username(&self.username)?;
        validate_full_name(&self.full_name)?;
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        Ok(())
    }
}

fn validate_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), DomainError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(DomainError::invalid_field(
            field,
            format!("must contain from {} to {} characters", min, max),
        ));
    }
    Ok(())
}

fn validate_username(value: &str) -> Result<(), DomainError> {
    validate_length("username", value, 3, 100)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(DomainError::invalid_field(
            "username",
            "must contain only lowercase letters, digits, or underscore",
        ));
    }
    Ok(())
}

fn validate_full_name(value: &str) -> Result<(), DomainError> {
    validate_length("full_name", value, 3, 100)?;
    if !value.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err(DomainError::invalid_field(
            "full_name",
            "must contain only letters or spaces",
        ));
    }
    Ok(())
}

fn validate_email(value: &str) -> Result<(), DomainError> {
    validate_length("email", value, 3, 200)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DomainError::invalid_field("email", "is not a valid email address")),
    }
}

fn validate_password(value: &str) -> Result<(), DomainError> {
    validate_length("password", value, 6, 100)
}

// =========================================================================
// UpdateUserCommand
// =========================================================================

/// Partial update of a user's profile. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserCommand {
    pub username: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl UpdateUserCommand {
    pub fn new(username: String) -> Self {
        Self {
            username,
            ..Self::default()
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Only the fields being changed are validated
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_username(&self.username)?;
        if let Some(full_name) = &self.full_name {
            validate_full_name(full_name)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

// =========================================================================
// LoginUserCommand
// =========================================================================

/// Credentials check for an existing user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginUserCommand {
    pub username: String,
    pub password: String,
}

impl LoginUserCommand {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_username(&self.username)?;
        validate_password(&self.password)
    }
}

// =========================================================================
// CreateAccountCommand
// =========================================================================

/// Command to open an account for an existing user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub owner: String,
    pub currency: Currency,
}

impl CreateAccountCommand {
    pub fn new(owner: String, currency: Currency) -> Self {
        Self { owner, currency }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AmountError;

    #[test]
    fn test_transfer_command_validation() {
        let cmd = TransferCommand::new(1, 2, 10).with_currency(Currency::Usd);
        assert_eq!(cmd.validate().unwrap().value(), 10);
        assert_eq!(cmd.currency, Some(Currency::Usd));
    }

    #[test]
    fn test_same_account_rejected_for_any_amount() {
        for amount in [-5, 0, 1, 1_000] {
            let cmd = TransferCommand::new(4, 4, amount);
            assert_eq!(cmd.validate(), Err(DomainError::SameAccountTransfer));
        }
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        assert_eq!(
            TransferCommand::new(1, 2, 0).validate(),
            Err(DomainError::InvalidAmount(AmountError::NotPositive(0)))
        );
        assert_eq!(
            TransferCommand::new(1, 2, -5).validate(),
            Err(DomainError::InvalidAmount(AmountError::NotPositive(-5)))
        );
    }

    #[test]
    fn test_create_user_command_validation() {
        let valid = CreateUserCommand::new(
            "alice_01".to_string(),
            "Alice Liddell".to_string(),
            "alice@example.com".to_string(),
            "secret123".to_string(),
        );
        assert!(valid.validate().is_ok());

        let mut bad_username = valid.clone();
        bad_username.username = "Alice!".to_string();
        assert!(matches!(
            bad_username.validate(),
            Err(DomainError::InvalidField { field: "username", .. })
        ));

        let mut bad_email = valid.clone();
        bad_email.email = "alice.example.com".to_string();
        assert!(matches!(
            bad_email.validate(),
            Err(DomainError::InvalidField { field: "email", .. })
        ));

        let mut short_password = valid;
        short_password.password = "123".to_string();
        assert!(matches!(
            short_password.validate(),
            Err(DomainError::InvalidField { field: "password", .. })
        ));
    }

    #[test]
    fn test_update_user_command_checks_only_present_fields() {
        assert!(UpdateUserCommand::new("alice".to_string()).validate().is_ok());
        assert!(UpdateUserCommand::new("alice".to_string())
            .with_full_name("Alice Pleasance")
            .validate()
            .is_ok());

        let bad_email = UpdateUserCommand::new("alice".to_string()).with_email("nope");
        assert!(matches!(
            bad_email.validate(),
            Err(DomainError::InvalidField { field: "email", .. })
        ));

        let short_password = UpdateUserCommand::new("alice".to_string()).with_password("123");
        assert!(matches!(
            short_password.validate(),
            Err(DomainError::InvalidField { field: "password", .. })
        ));

        let bad_username = UpdateUserCommand::new("A".to_string());
        assert!(matches!(
            bad_username.validate(),
            Err(DomainError::InvalidField { field: "username", .. })
        ));
    }
}
