//! Encrypted user store: `username:base64(aes256cbc(password))` lines.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::crypto::{AesMode, decrypt_buffer};
use crate::error::{ConfigErrorKind, Error, Result};

use super::user::{MAX_PASSWORD_LENGTH, MAX_USERNAME_LENGTH, NUMBER_OF_USERS, User};

/// Load and decrypt every line of a users file.
///
/// Fails with [`ConfigErrorKind::UserCountExceeded`] if the file has more
/// than [`NUMBER_OF_USERS`] lines, as a status distinct from a plain parse
/// failure.
pub fn load_users_file(path: &Path, master_key: &[u8]) -> Result<Vec<User>> {
    let text = std::fs::read_to_string(path)?;
    let mut users = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((username, encoded)) = line.split_once(':') else {
            return Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("users file line {}: expected 'username:ciphertext'", line_no + 1),
            ));
        };

        let ciphertext = BASE64.decode(encoded.trim()).map_err(|e| {
            Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("users file line {}: invalid base64: {e}", line_no + 1),
            )
        })?;

        let plain = decrypt_buffer(&ciphertext, AesMode::Aes256Cbc, master_key)
            .map_err(|e| Error::config(ConfigErrorKind::NotFoundOrParse, e.to_string()))?;

        // decrypt_buffer appends a trailing NUL for C-string compatibility.
        let password_bytes = &plain[..plain.len().saturating_sub(1)];
        let password = String::from_utf8(password_bytes.to_vec()).map_err(|e| {
            Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!("users file line {}: decrypted password is not UTF-8: {e}", line_no + 1),
            )
        })?;

        let username = username.trim().to_string();
        if username.len() > MAX_USERNAME_LENGTH {
            return Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!(
                    "users file line {}: username exceeds MAX_USERNAME_LENGTH ({MAX_USERNAME_LENGTH})",
                    line_no + 1
                ),
            ));
        }
        if password.len() > MAX_PASSWORD_LENGTH {
            return Err(Error::config(
                ConfigErrorKind::NotFoundOrParse,
                format!(
                    "users file line {}: password exceeds MAX_PASSWORD_LENGTH ({MAX_PASSWORD_LENGTH})",
                    line_no + 1
                ),
            ));
        }

        users.push(User { username, password });

        if users.len() > NUMBER_OF_USERS {
            return Err(Error::config(
                ConfigErrorKind::UserCountExceeded,
                format!("users file has more than {NUMBER_OF_USERS} entries"),
            ));
        }
    }

    Ok(users)
}

/// Encrypt `password` for `username` into one users-file line.
pub fn encode_user_line(username: &str, password: &str, master_key: &[u8]) -> Result<String> {
    let ciphertext = crate::crypto::encrypt_buffer(password.as_bytes(), AesMode::Aes256Cbc, master_key)?;
    Ok(format!("{username}:{}", BASE64.encode(ciphertext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.conf");
        let master_key = b"topsecret";

        let line = encode_user_line("alice", "secret", master_key).expect("encode");
        std::fs::write(&path, format!("{line}\n")).expect("write");

        let users = load_users_file(&path, master_key).expect("load");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].password, "secret");
    }

    #[test]
    fn rejects_too_many_users() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.conf");
        let master_key = b"topsecret";

        let mut contents = String::new();
        for i in 0..=NUMBER_OF_USERS {
            let line = encode_user_line(&format!("user{i}"), "secret", master_key).expect("encode");
            contents.push_str(&line);
            contents.push('\n');
        }
        std::fs::write(&path, contents).expect("write");

        let err = load_users_file(&path, master_key).unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                kind: ConfigErrorKind::UserCountExceeded,
                ..
            }
        ));
    }
}
