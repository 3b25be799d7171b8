//! User identity as loaded from the encrypted user store.

/// Maximum number of configured users.
pub const NUMBER_OF_USERS: usize = 64;
/// Maximum stored password length, in bytes.
pub const MAX_PASSWORD_LENGTH: usize = 1024;
/// Maximum username length, in bytes.
pub const MAX_USERNAME_LENGTH: usize = 128;

/// A decrypted username/password pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub password: String,
}
