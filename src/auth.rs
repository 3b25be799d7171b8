//! Server-side authentication: the half of each mechanism pgvictoria performs
//! when a client is authenticating *to* it, as opposed to the frontend
//! client-role implementations in [`crate::protocol::frontend::auth`].

use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Default SCRAM-SHA-256 iteration count, matching PostgreSQL's own default.
pub const SCRAM_DEFAULT_ITERATIONS: u32 = 4096;

/// Verify an MD5 password response received from a client.
///
/// `response` is the "md5..." string the client sent back in a PasswordMessage.
/// `stored_md5` is `md5(password + username)` as kept in the user store.
pub fn verify_md5_password(username: &str, stored_md5: &str, salt: [u8; 4], response: &str) -> bool {
    use md5::{Digest as _, Md5};

    let mut hasher = Md5::new();
    hasher.update(stored_md5.as_bytes());
    hasher.update(salt);
    let expected = format!("md5{:x}", hasher.finalize());
    let _ = username;
    expected == response
}

/// Compute `md5(password + username)`, the form pgvictoria's encrypted user
/// store keeps instead of the plaintext password.
pub fn md5_stored_hash(username: &str, password: &str) -> String {
    use md5::{Digest as _, Md5};

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Server-side SCRAM-SHA-256 credentials derived once from a plaintext password,
/// stored so every handshake doesn't re-run PBKDF2.
#[derive(Debug, Clone)]
pub struct ScramCredentials {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
}

impl ScramCredentials {
    /// Derive credentials from a plaintext password, generating a fresh random salt.
    pub fn derive(password: &str) -> Self {
        let mut salt = vec![0u8; 16];
        rand::rng().fill(salt.as_mut_slice());
        Self::derive_with_salt(password, salt, SCRAM_DEFAULT_ITERATIONS)
    }

    /// Derive credentials from a plaintext password with an explicit salt and
    /// iteration count, used when loading a value already present in the user store.
    pub fn derive_with_salt(password: &str, salt: Vec<u8>, iterations: u32) -> Self {
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut salted_password);

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&salted_password)
            .expect("HMAC accepts any key length");
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes();
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&salted_password)
            .expect("HMAC accepts any key length");
        mac.update(b"Server Key");
        let server_key: [u8; 32] = mac.finalize().into_bytes().into();

        Self {
            salt,
            iterations,
            stored_key,
            server_key,
        }
    }
}

/// Server-side state machine for one SCRAM-SHA-256 handshake.
pub struct ScramServer {
    credentials: ScramCredentials,
    nonce: String,
    client_first_bare: Option<String>,
    server_first: Option<String>,
}

impl ScramServer {
    pub fn new(credentials: ScramCredentials) -> Self {
        let mut nonce_bytes = [0u8; 18];
        rand::rng().fill(&mut nonce_bytes);
        let nonce = base64::engine::general_purpose::STANDARD.encode(nonce_bytes);
        Self {
            credentials,
            nonce,
            client_first_bare: None,
            server_first: None,
        }
    }

    /// Process the client-first-message and return the server-first-message
    /// to send back via `AuthenticationSASLContinue`.
    pub fn process_client_first(&mut self, client_first: &str) -> Result<String> {
        let bare = client_first
            .strip_prefix("n,,")
            .or_else(|| client_first.strip_prefix("y,,"))
            .unwrap_or(client_first);

        let client_nonce = bare
            .split(',')
            .find_map(|part| part.strip_prefix("r="))
            .ok_or_else(|| Error::Auth("SCRAM client-first-message missing nonce".into()))?;

        self.client_first_bare = Some(bare.to_string());

        let combined_nonce = format!("{client_nonce}{}", self.nonce);
        let salt_b64 = base64::engine::general_purpose::STANDARD.encode(&self.credentials.salt);

        let server_first = format!(
            "r={combined_nonce},s={salt_b64},i={}",
            self.credentials.iterations
        );
        self.server_first = Some(server_first.clone());
        Ok(server_first)
    }

    /// Process the client-final-message, verifying ClientProof, and return the
    /// server-final-message to send via `AuthenticationSASLFinal`.
    pub fn process_client_final(&self, client_final: &str) -> Result<String> {
        let client_first_bare = self
            .client_first_bare
            .as_ref()
            .ok_or_else(|| Error::Auth("SCRAM client-final received before client-first".into()))?;
        let server_first = self
            .server_first
            .as_ref()
            .ok_or_else(|| Error::Auth("SCRAM client-final received before server-first".into()))?;

        let without_proof = client_final
            .rfind(",p=")
            .map(|idx| &client_final[..idx])
            .ok_or_else(|| Error::Auth("SCRAM client-final-message missing proof".into()))?;
        let proof_b64 = client_final
            .rsplit(",p=")
            .next()
            .ok_or_else(|| Error::Auth("SCRAM client-final-message missing proof".into()))?;

        let client_proof = base64::engine::general_purpose::STANDARD
            .decode(proof_b64)
            .map_err(|e| Error::Auth(format!("invalid SCRAM proof encoding: {e}")))?;
        if client_proof.len() != 32 {
            return Err(Error::Auth("invalid SCRAM proof length".into()));
        }

        let auth_message = format!("{client_first_bare},{server_first},{without_proof}");

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.credentials.stored_key)
            .expect("HMAC accepts any key length");
        mac.update(auth_message.as_bytes());
        let client_signature = mac.finalize().into_bytes();

        let mut client_key = [0u8; 32];
        for i in 0..32 {
            client_key[i] = client_proof[i] ^ client_signature[i];
        }
        let computed_stored_key: [u8; 32] = Sha256::digest(client_key).into();

        if computed_stored_key != self.credentials.stored_key {
            return Err(Error::Auth("SCRAM client proof verification failed".into()));
        }

        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.credentials.server_key)
            .expect("HMAC accepts any key length");
        mac.update(auth_message.as_bytes());
        let server_signature = mac.finalize().into_bytes();
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(server_signature);

        Ok(format!("v={signature_b64}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_roundtrip_matches_stored_hash() {
        let stored = md5_stored_hash("alice", "hunter2");
        let salt = [1, 2, 3, 4];
        let response = crate::protocol::frontend::auth::md5_password("alice", "hunter2", &salt);
        assert!(verify_md5_password("alice", &stored, salt, &response));
    }

    #[test]
    fn scram_handshake_round_trips() {
        let creds = ScramCredentials::derive("hunter2");
        let mut server = ScramServer::new(creds.clone());
        let mut client = crate::protocol::frontend::auth::ScramClient::new("hunter2");

        let client_first = client.client_first_message();
        let server_first = server.process_client_first(&client_first).unwrap();
        let client_final = client.process_server_first(&server_first).unwrap();
        let server_final = server.process_client_final(&client_final).unwrap();
        assert!(client.verify_server_final(&server_final).is_ok());
    }

    #[test]
    fn scram_rejects_wrong_password() {
        let creds = ScramCredentials::derive("hunter2");
        let mut server = ScramServer::new(creds);
        let mut client = crate::protocol::frontend::auth::ScramClient::new("wrong");

        let client_first = client.client_first_message();
        let server_first = server.process_client_first(&client_first).unwrap();
        let client_final = client.process_server_first(&server_first).unwrap();
        assert!(server.process_client_final(&client_final).is_err());
    }
}
