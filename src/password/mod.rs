//! Storage password encoding for `userPassword` values
//!
//! Values are hashed before they reach the backend. Already-encoded values
//! (any supported scheme) pass through untouched so that re-persisting an
//! entry read back from the store does not hash twice.

use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash,
    PasswordHasher as _, PasswordVerifier, Version,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::error::{AppError, AppResult};
use crate::models::RawEntry;

pub const USER_PASSWORD: &str = "userPassword";

const SSHA_PREFIX: &str = "{SSHA}";
const SSHA_SALT_LEN: usize = 8;
const SHA1_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordAlgorithm {
    /// Salted SHA-1, the directory-server default
    #[default]
    Ssha,
    Bcrypt,
    Argon2id,
}

impl std::fmt::Display for PasswordAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssha => write!(f, "SSHA"),
            Self::Bcrypt => write!(f, "bcrypt"),
            Self::Argon2id => write!(f, "Argon2id"),
        }
    }
}

impl PasswordAlgorithm {
    /// Detect which scheme produced `value`
    pub fn detect(value: &str) -> Option<Self> {
        if let Some(encoded) = value.strip_prefix(SSHA_PREFIX) {
            return general_purpose::STANDARD
                .decode(encoded)
                .ok()
                .filter(|raw| raw.len() > SHA1_LEN)
                .map(|_| Self::Ssha);
        }
        if value.starts_with("$argon2id$") && PasswordHash::new(value).is_ok() {
            return Some(Self::Argon2id);
        }
        if (value.starts_with("$2a$") || value.starts_with("$2b$") || value.starts_with("$2y$"))
            && value.len() == 60
        {
            return Some(Self::Bcrypt);
        }
        None
    }
}

/// Hashes and verifies storage passwords with one configured scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct StoragePasswordEncoder {
    algorithm: PasswordAlgorithm,
    bcrypt_cost: Option<u32>,
}

impl StoragePasswordEncoder {
    pub fn new(algorithm: PasswordAlgorithm) -> Self {
        Self {
            algorithm,
            bcrypt_cost: None,
        }
    }

    /// bcrypt work factor, 4..=31
    pub fn with_bcrypt_cost(mut self, cost: u32) -> AppResult<Self> {
        if !(4..=31).contains(&cost) {
            return Err(AppError::Configuration(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }
        self.bcrypt_cost = Some(cost);
        Ok(self)
    }

    pub fn algorithm(&self) -> PasswordAlgorithm {
        self.algorithm
    }

    pub fn is_encoded(&self, value: &str) -> bool {
        PasswordAlgorithm::detect(value).is_some()
    }

    pub fn encode(&self, password: &str) -> AppResult<String> {
        if password.is_empty() {
            return Err(AppError::InvalidRequest(
                "Password cannot be empty".to_string(),
            ));
        }
        match self.algorithm {
            PasswordAlgorithm::Ssha => {
                let mut salt = [0u8; SSHA_SALT_LEN];
                rand::thread_rng().fill_bytes(&mut salt);
                Ok(ssha_encode(password, &salt))
            }
            PasswordAlgorithm::Bcrypt => {
                bcrypt::hash(password, self.bcrypt_cost.unwrap_or(bcrypt::DEFAULT_COST))
                    .map_err(|e| AppError::Internal(format!("bcrypt hashing failed: {}", e)))
            }
            PasswordAlgorithm::Argon2id => {
                let salt = SaltString::generate(&mut rand::thread_rng());
                argon2_hasher()?
                    .hash_password(password.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|e| AppError::Internal(format!("Argon2id hashing failed: {}", e)))
            }
        }
    }

    /// Check `password` against a stored value of any supported scheme
    pub fn verify(&self, password: &str, stored: &str) -> AppResult<bool> {
        match PasswordAlgorithm::detect(stored) {
            Some(PasswordAlgorithm::Ssha) => ssha_verify(password, stored),
            Some(PasswordAlgorithm::Bcrypt) => bcrypt::verify(password, stored)
                .map_err(|e| AppError::Internal(format!("bcrypt verification failed: {}", e))),
            Some(PasswordAlgorithm::Argon2id) => {
                let parsed = PasswordHash::new(stored)
                    .map_err(|e| AppError::Internal(format!("Invalid Argon2id hash: {}", e)))?;
                match argon2_hasher()?.verify_password(password.as_bytes(), &parsed) {
                    Ok(()) => Ok(true),
                    Err(argon2::password_hash::Error::Password) => Ok(false),
                    Err(e) => Err(AppError::Internal(format!(
                        "Argon2id verification failed: {}",
                        e
                    ))),
                }
            }
            None => Err(AppError::InvalidRequest(
                "Stored password uses an unsupported scheme".to_string(),
            )),
        }
    }

    /// Hash every plaintext `userPassword` value of an entry in place
    pub fn encode_entry(&self, entry: &mut RawEntry) -> AppResult<()> {
        if let Some(values) = entry.attributes.get_mut(USER_PASSWORD) {
            for value in values.iter_mut() {
                if !self.is_encoded(value) {
                    *value = self.encode(value)?;
                }
            }
        }
        Ok(())
    }
}

fn argon2_hasher() -> AppResult<Argon2<'static>> {
    // 19 MiB, 2 iterations, 1 lane
    let params = Params::new(19456, 2, 1, Some(32))
        .map_err(|e| AppError::Internal(format!("Invalid Argon2 parameters: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn ssha_digest(password: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().to_vec()
}

fn ssha_encode(password: &str, salt: &[u8]) -> String {
    let mut combined = ssha_digest(password, salt);
    combined.extend_from_slice(salt);
    format!("{}{}", SSHA_PREFIX, general_purpose::STANDARD.encode(combined))
}

fn ssha_verify(password: &str, stored: &str) -> AppResult<bool> {
    let encoded = stored
        .strip_prefix(SSHA_PREFIX)
        .ok_or_else(|| AppError::InvalidRequest("Invalid SSHA value".to_string()))?;
    let combined = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid SSHA encoding: {}", e)))?;
    if combined.len() <= SHA1_LEN {
        return Err(AppError::InvalidRequest("Invalid SSHA length".to_string()));
    }
    let (digest, salt) = combined.split_at(SHA1_LEN);
    Ok(digest == ssha_digest(password, salt).as_slice())
}
