pub mod model;
pub mod pipeline;
pub mod session;
pub mod worker;

pub use model::{ClassifierModel, OnnxClassifier};
pub use pipeline::{ClassificationResult, InferencePipeline, InputShape};
pub use session::SessionController;
pub use worker::ClassifierWorker;
