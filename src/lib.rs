// Core modules
pub mod common;
pub mod core;
pub mod storage;

// Re-export commonly used types
pub use crate::common::{Config, DetectorError, PasswordScheme, Result};
pub use crate::core::{
    ClassificationResult, ClassifierModel, ClassifierWorker, InferencePipeline, InputShape,
    OnnxClassifier, SessionController,
};
pub use crate::storage::{CredentialStore, UserRecord};
