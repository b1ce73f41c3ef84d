pub mod password;

pub use password::{hash_password, needs_rehash, verify_password, Password, PasswordHashString};
