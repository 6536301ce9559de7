pub mod config;
pub mod error;

pub use config::{Config, PasswordScheme, ResizeFilter};
pub use error::{DetectorError, Result};
