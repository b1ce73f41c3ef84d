use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Hash burned through verification when the account does not exist, so
/// unknown-user and wrong-password take the same time.
static DUMMY_HASH: Lazy<PasswordHashString> = Lazy::new(|| {
    hash_password(&Password::new("placeholder-never-matches".to_string()))
        .expect("hashing a fixed placeholder cannot fail")
});

/// Hash a password using Argon2id with current default parameters.
/// Salt is automatically generated and included in the hash.
pub fn hash_password(password: &Password) -> Result<PasswordHashString, anyhow::Error> {
    let argon2 = Argon2::default();
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = argon2
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();

    Ok(PasswordHashString::new(password_hash))
}

/// Verify a password against a hash.
///
/// Returns Ok(()) if password matches, Err otherwise.
pub fn verify_password(
    password: &Password,
    password_hash: &PasswordHashString,
) -> Result<(), anyhow::Error> {
    let parsed_hash = PasswordHash::new(password_hash.as_str())
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

    Argon2::default()
        .verify_password(password.as_str().as_bytes(), &parsed_hash)
        .map_err(|_| anyhow::anyhow!("Password verification failed"))
}

/// Burn one verification against a fixed hash. Called on the
/// unknown-user path so it is not distinguishable by timing from a
/// wrong password.
pub fn verify_dummy(password: &Password) {
    let _ = verify_password(password, &DUMMY_HASH);
}

/// Check whether a stored hash was produced with parameters older than
/// the current policy. Verified-then-stale hashes are transparently
/// re-hashed on login, so parameter upgrades need no password reset.
pub fn needs_rehash(password_hash: &PasswordHashString) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash.as_str()) else {
        return true;
    };

    if parsed.algorithm != argon2::ARGON2ID_IDENT {
        return true;
    }

    let Ok(params) = argon2::Params::try_from(&parsed) else {
        return true;
    };

    let current = argon2::Params::default();
    params.m_cost() != current.m_cost()
        || params.t_cost() != current.t_cost()
        || params.p_cost() != current.p_cost()
}
