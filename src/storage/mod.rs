pub mod credential_store;

pub use credential_store::{CredentialStore, UserRecord, hash_password, hash_password_salted};
