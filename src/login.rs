#[cfg(feature = "web")]
use crate::app::{AppError, AuthUser, JsonBody, SharedState};
#[cfg(feature = "web")]
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
#[cfg(feature = "web")]
use lazy_static::lazy_static;
#[cfg(feature = "web")]
use parking_lot::RwLock;
#[cfg(feature = "web")]
use regex::Regex;
use serde::{Deserialize, Serialize};
#[cfg(feature = "web")]
use std::collections::HashMap;
#[cfg(feature = "web")]
use std::fs::{self, File, create_dir_all};
#[cfg(feature = "web")]
use std::io::Write;
#[cfg(feature = "web")]
use std::path::{Path, PathBuf};
#[cfg(feature = "web")]
use std::time::Duration;
use uuid::Uuid;

/// User data structure representing a registered application user
///
/// This structure contains all the information about a registered user,
/// including the argon2 hash of their password.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Stable identifier, used as the owner of calculations
    pub id: Uuid,

    /// Username (unique)
    pub username: String,

    /// Email address (unique, accepted in place of the username at login)
    pub email: String,

    pub first_name: String,

    pub last_name: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Registration form data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
    pub confirm_password: String,
}

/// Login form data
///
/// `username` may also hold the account's email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLogin {
    pub username: String,
    pub password: String,
}

/// Public view of a user, without the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Successful login response carrying the bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// Failures of account operations
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// A registration field failed validation
    #[error("{0}")]
    Invalid(String),

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The users file could not be read or written
    #[error("user store error: {0}")]
    Storage(String),
}

#[cfg(feature = "web")]
lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,50}$").unwrap();
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[A-Za-z]{2,}$").unwrap();

    /// Verified against on unknown logins so a miss costs as much as a hit.
    static ref DUMMY_HASH: String = hash_password("not-a-real-password").unwrap_or_default();
}

#[cfg(feature = "web")]
const SPECIAL_CHARACTERS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Check a registration form against the account rules
///
/// # Errors
/// * Returns [`AccountError::Invalid`] naming the first rule that failed
#[cfg(feature = "web")]
pub fn validate_registration(form: &UserCreate) -> Result<(), AccountError> {
    if !USERNAME_REGEX.is_match(&form.username) {
        return Err(AccountError::Invalid(
            "Username must be 3-50 characters of letters, digits, '_', '.' or '-'".to_string(),
        ));
    }
    if !EMAIL_REGEX.is_match(&form.email) {
        return Err(AccountError::Invalid("Invalid email address".to_string()));
    }
    for (field, value) in [("First name", &form.first_name), ("Last name", &form.last_name)] {
        let len = value.trim().chars().count();
        if len == 0 || len > 50 {
            return Err(AccountError::Invalid(format!(
                "{field} must be 1-50 characters long"
            )));
        }
    }
    validate_password(&form.password)?;
    if form.password != form.confirm_password {
        return Err(AccountError::Invalid("Passwords do not match".to_string()));
    }
    Ok(())
}

#[cfg(feature = "web")]
fn validate_password(password: &str) -> Result<(), AccountError> {
    let len = password.chars().count();
    let rule = if len < 8 {
        Some("Password must be at least 8 characters long")
    } else if len > 128 {
        Some("Password must be at most 128 characters long")
    } else if !password.chars().any(|c| c.is_uppercase()) {
        Some("Password must contain at least one uppercase letter")
    } else if !password.chars().any(|c| c.is_lowercase()) {
        Some("Password must contain at least one lowercase letter")
    } else if !password.chars().any(|c| c.is_ascii_digit()) {
        Some("Password must contain at least one digit")
    } else if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        Some("Password must contain at least one special character")
    } else {
        None
    };

    match rule {
        Some(message) => Err(AccountError::Invalid(message.to_string())),
        None => Ok(()),
    }
}

/// Registered users, keyed by username
///
/// File-backed directories keep `users.json` in the data directory and
/// rewrite it after every registration.
#[cfg(feature = "web")]
pub struct UserDirectory {
    path: Option<PathBuf>,
    users: RwLock<HashMap<String, User>>,
}

#[cfg(feature = "web")]
impl UserDirectory {
    /// A directory that lives only in memory
    pub fn in_memory() -> Self {
        UserDirectory {
            path: None,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Open the users file inside `data_dir`
    ///
    /// Creates the data directory and an empty `users.json` if they don't
    /// exist yet.
    ///
    /// # Errors
    /// * Returns an error if the users file cannot be created, read, or parsed
    pub fn open(data_dir: &Path) -> Result<Self, AccountError> {
        if !data_dir.exists() {
            create_dir_all(data_dir).map_err(|e| {
                AccountError::Storage(format!("failed to create {}: {}", data_dir.display(), e))
            })?;
        }

        let users_path = data_dir.join("users.json");
        if !users_path.exists() {
            let mut file = File::create(&users_path)
                .map_err(|e| AccountError::Storage(format!("failed to create users file: {e}")))?;
            file.write_all(b"{}")
                .map_err(|e| AccountError::Storage(format!("failed to write users file: {e}")))?;
        }

        let contents = fs::read_to_string(&users_path)
            .map_err(|e| AccountError::Storage(format!("failed to read users file: {e}")))?;
        let users: HashMap<String, User> = serde_json::from_str(&contents)
            .map_err(|e| AccountError::Storage(format!("failed to parse users data: {e}")))?;

        log::debug!("loaded {} user(s) from {}", users.len(), users_path.display());
        Ok(UserDirectory {
            path: Some(users_path),
            users: RwLock::new(users),
        })
    }

    /// Register a new user
    ///
    /// The password is hashed before storage.
    ///
    /// # Errors
    /// * Returns an error if the form is invalid
    /// * Returns an error if the username or email is already in use
    pub fn register(&self, form: &UserCreate) -> Result<User, AccountError> {
        validate_registration(form)?;
        let password_hash = hash_password(&form.password)?;

        let mut users = self.users.write();
        if users.contains_key(&form.username) {
            return Err(AccountError::UsernameTaken);
        }
        if users
            .values()
            .any(|user| user.email.eq_ignore_ascii_case(&form.email))
        {
            return Err(AccountError::EmailTaken);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: form.username.clone(),
            email: form.email.clone(),
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
            password_hash,
            created_at: now,
            updated_at: now,
        };

        users.insert(user.username.clone(), user.clone());
        if let Err(e) = self.save(&users) {
            users.remove(&user.username);
            return Err(e);
        }

        log::info!("registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Verify user credentials
    ///
    /// `login` may be either the username or the email address.
    ///
    /// # Errors
    /// * Returns [`AccountError::InvalidCredentials`] on any mismatch
    pub fn authenticate(&self, login: &str, password: &str) -> Result<User, AccountError> {
        let user = {
            let users = self.users.read();
            users
                .get(login)
                .or_else(|| users.values().find(|u| u.email.eq_ignore_ascii_case(login)))
                .cloned()
        };

        match user {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(user),
            Some(_) => Err(AccountError::InvalidCredentials),
            None => {
                let _ = verify_password(password, &DUMMY_HASH);
                Err(AccountError::InvalidCredentials)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn save(&self, users: &HashMap<String, User>) -> Result<(), AccountError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(users)
            .map_err(|e| AccountError::Storage(format!("failed to serialize users data: {e}")))?;

        let tmp_path = path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)
        };
        write().map_err(|e| AccountError::Storage(format!("failed to write users data: {e}")))
    }
}

/// Hash a password using Argon2
///
/// Creates a cryptographically secure hash of a password using Argon2id.
#[cfg(feature = "web")]
fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err(AccountError::Storage("Password hashing failed".to_string())),
    }
}

/// Verify a password against a stored hash
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
#[cfg(feature = "web")]
fn verify_password(password: &str, hash: &str) -> Result<bool, AccountError> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => {
            return Err(AccountError::Storage(
                "Invalid password hash format".to_string(),
            ));
        }
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

/// User session data
///
/// Represents an authenticated bearer session.
#[cfg(feature = "web")]
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Active bearer sessions, keyed by token
#[cfg(feature = "web")]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

#[cfg(feature = "web")]
impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a new session for `user_id`, returning the token and its expiry
    ///
    /// Sessions that have already expired are dropped on the way.
    pub fn create(&self, user_id: Uuid) -> (String, DateTime<Utc>) {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut sessions = self.sessions.write();
        sessions.retain(|_, session| session.expires_at > now);
        sessions.insert(token.clone(), Session { user_id, expires_at });

        (token, expires_at)
    }

    /// Number of sessions currently held, expired ones included
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// The user for a live session; expired sessions are dropped
    pub fn validate(&self, token: &str) -> Option<Uuid> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(token) {
                Some(session) if session.expires_at > now => return Some(session.user_id),
                Some(_) => {}
                None => return None,
            }
        }

        self.sessions.write().remove(token);
        None
    }

    /// Remove a session; returns whether it existed
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }
}

/// Handle user registration
///
/// # Returns
/// * `201 Created` with the public user record, or `400` with the reason
#[cfg(feature = "web")]
pub async fn handle_register(
    State(state): State<SharedState>,
    JsonBody(form): JsonBody<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = state.users.register(&form)?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// Handle user login requests
///
/// Validates credentials and issues a bearer session token.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<SharedState>,
    JsonBody(credentials): JsonBody<UserLogin>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = state
        .users
        .authenticate(&credentials.username, &credentials.password)
        .inspect_err(|_| log::debug!("failed login for {}", credentials.username))?;
    let (access_token, expires_at) = state.sessions.create(user.id);
    log::info!("user {} logged in", user.username);

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_at,
        user_id: user.id,
        username: user.username,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
    }))
}

/// Handle user logout
///
/// Revokes the presented bearer token.
#[cfg(feature = "web")]
pub async fn handle_logout(State(state): State<SharedState>, auth: AuthUser) -> StatusCode {
    state.sessions.revoke(&auth.token);
    log::info!("user {} logged out", auth.user_id);
    StatusCode::NO_CONTENT
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn form(username: &str, email: &str) -> UserCreate {
        UserCreate {
            username: username.to_string(),
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            password: "SecurePass123!".to_string(),
            confirm_password: "SecurePass123!".to_string(),
        }
    }

    #[test]
    fn test_password_rules() {
        let mut f = form("johndoe", "john@example.com");
        f.password = "short".into();
        f.confirm_password = "short".into();
        let err = validate_registration(&f).unwrap_err();
        assert_eq!(err.to_string(), "Password must be at least 8 characters long");

        f.password = "alllowercase1!".into();
        f.confirm_password = f.password.clone();
        assert!(validate_registration(&f).unwrap_err().to_string().contains("uppercase"));

        f.password = "NoSpecial123".into();
        f.confirm_password = f.password.clone();
        assert!(validate_registration(&f).unwrap_err().to_string().contains("special"));

        f.password = "SecurePass123!".into();
        f.confirm_password = "SecurePass123?".into();
        assert_eq!(
            validate_registration(&f).unwrap_err().to_string(),
            "Passwords do not match"
        );
    }

    #[test]
    fn test_username_and_email_rules() {
        assert!(validate_registration(&form("jo", "jo@example.com")).is_err());
        assert!(validate_registration(&form("john doe", "john@example.com")).is_err());
        assert!(validate_registration(&form("johndoe", "not-an-email")).is_err());
        assert!(validate_registration(&form("johndoe", "john@example.com")).is_ok());
    }

    #[test]
    fn test_register_and_authenticate() {
        let users = UserDirectory::in_memory();
        let user = users.register(&form("johndoe", "john@example.com")).unwrap();
        assert_ne!(user.password_hash, "SecurePass123!");

        let by_name = users.authenticate("johndoe", "SecurePass123!").unwrap();
        assert_eq!(by_name.id, user.id);
        let by_email = users.authenticate("john@example.com", "SecurePass123!").unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(matches!(
            users.authenticate("johndoe", "WrongPass123!"),
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            users.authenticate("nobody", "SecurePass123!"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let users = UserDirectory::in_memory();
        users.register(&form("johndoe", "john@example.com")).unwrap();

        assert!(matches!(
            users.register(&form("johndoe", "other@example.com")),
            Err(AccountError::UsernameTaken)
        ));
        assert!(matches!(
            users.register(&form("janedoe", "JOHN@example.com")),
            Err(AccountError::EmailTaken)
        ));
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_users_file_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let users = UserDirectory::open(tmp.path()).unwrap();
            assert!(users.is_empty());
            users.register(&form("johndoe", "john@example.com")).unwrap().id
        };

        let users = UserDirectory::open(tmp.path()).unwrap();
        assert_eq!(users.authenticate("johndoe", "SecurePass123!").unwrap().id, id);
    }

    #[test]
    fn test_sessions_expire_and_revoke() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let user_id = Uuid::new_v4();
        let (token, expires_at) = registry.create(user_id);
        assert!(expires_at > Utc::now());
        assert_eq!(registry.validate(&token), Some(user_id));

        assert!(registry.revoke(&token));
        assert_eq!(registry.validate(&token), None);
        assert!(!registry.revoke(&token));

        let expired = SessionRegistry::new(Duration::ZERO);
        let (token, _) = expired.create(user_id);
        assert_eq!(expired.validate(&token), None);
        assert_eq!(expired.validate("never-issued"), None);
    }

    #[test]
    fn test_expired_sessions_do_not_accumulate() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let user_id = Uuid::new_v4();

        let mut last = String::new();
        for _ in 0..100 {
            last = registry.create(user_id).0;
        }
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.validate(&last), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_login_runs_a_real_verification() {
        assert!(PasswordHash::new(&DUMMY_HASH).is_ok());

        let users = UserDirectory::in_memory();
        assert!(matches!(
            users.authenticate("ghost", "SecurePass123!"),
            Err(AccountError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_save_replaces_users_file_atomically() {
        let tmp = TempDir::new().unwrap();
        let users = UserDirectory::open(tmp.path()).unwrap();
        users.register(&form("johndoe", "john@example.com")).unwrap();
        users.register(&form("janedoe", "jane@example.com")).unwrap();

        assert!(!tmp.path().join("users.json.tmp").exists());
        let contents = fs::read_to_string(tmp.path().join("users.json")).unwrap();
        let parsed: HashMap<String, User> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
