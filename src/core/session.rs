use crate::common::{DetectorError, Result};
use crate::core::pipeline::ClassificationResult;
use crate::core::worker::ClassifierWorker;
use crate::storage::CredentialStore;
use std::path::Path;

/// Routes front-end actions to the credential store and the classifier,
/// tracking whether someone is logged in.
pub struct SessionController {
    store: CredentialStore,
    classifier: ClassifierWorker,
    current_user: Option<String>,
}

impl SessionController {
    pub fn new(store: CredentialStore, classifier: ClassifierWorker) -> Self {
        Self {
            store,
            classifier,
            current_user: None,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn register(&self, username: &str, password: &str) -> Result<bool> {
        self.store.register(username, password)
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<bool> {
        let ok = self.store.authenticate(username, password)?;
        if ok {
            tracing::info!("User {} logged in", username);
            self.current_user = Some(username.to_string());
        } else {
            tracing::warn!("Login failed");
        }
        Ok(ok)
    }

    pub fn logout(&mut self) {
        if let Some(user) = self.current_user.take() {
            tracing::info!("User {} logged out", user);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user.is_some()
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub fn classify(&self, image_path: &Path) -> Result<ClassificationResult> {
        if !self.is_authenticated() {
            return Err(DetectorError::NotAuthenticated);
        }
        self.classifier.classify(image_path)
    }
}
