use crate::common::{Config, DetectorError, Result};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// A pretrained binary classifier seen only through its input shape and a
/// prediction call.
pub trait ClassifierModel {
    /// Declared input dimensions, normally `(batch, height, width, channels)`.
    /// Dynamic dimensions are `None`.
    fn input_shape(&self) -> Vec<Option<usize>>;

    /// Runs the model on a `(1, H, W, C)` tensor and returns the first output
    /// score.
    fn predict(&self, input: Array4<f32>) -> Result<f32>;
}

impl<M: ClassifierModel + ?Sized> ClassifierModel for Box<M> {
    fn input_shape(&self) -> Vec<Option<usize>> {
        (**self).input_shape()
    }

    fn predict(&self, input: Array4<f32>) -> Result<f32> {
        (**self).predict(input)
    }
}

/// ONNX Runtime adapter. Expects an NHWC graph with a single scalar (sigmoid)
/// output, such as a Keras model exported with tf2onnx.
pub struct OnnxClassifier {
    session: Session,
    _environment: Arc<Environment>,
    input_shape: Vec<Option<usize>>,
}

impl OnnxClassifier {
    pub fn new(config: &Config) -> Result<Self> {
        Self::load(&config.model.path, config.model.optimization_level)
    }

    pub fn load(model_path: &Path, optimization_level: u32) -> Result<Self> {
        if !model_path.exists() {
            return Err(DetectorError::Model(
                format!("Classification model not found at: {:?}", model_path)
            ));
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("fracture_classifier")
                .build()
                .map_err(|e| DetectorError::Model(format!("Failed to create environment: {}", e)))?
        );

        let opt_level = match optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };

        let session = SessionBuilder::new(&environment)
            .and_then(|builder| builder.with_optimization_level(opt_level))
            .and_then(|builder| builder.with_model_from_file(model_path))
            .map_err(|e| DetectorError::Model(format!("Failed to load {:?}: {}", model_path, e)))?;

        let input = session.inputs.first()
            .ok_or_else(|| DetectorError::Model("Model declares no inputs".into()))?;
        let input_shape: Vec<Option<usize>> = input.dimensions
            .iter()
            .map(|d| d.map(|v| v as usize))
            .collect();

        tracing::info!(
            "Loaded classifier {:?} (input '{}', shape {:?})",
            model_path, input.name, input_shape
        );

        Ok(Self {
            session,
            _environment: environment,
            input_shape,
        })
    }
}

impl ClassifierModel for OnnxClassifier {
    fn input_shape(&self) -> Vec<Option<usize>> {
        self.input_shape.clone()
    }

    fn predict(&self, input: Array4<f32>) -> Result<f32> {
        let cow_array = CowArray::from(input.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)
            .map_err(|e| DetectorError::Inference(format!("Failed to build input tensor: {}", e)))?;

        let outputs = self.session.run(vec![input_tensor])
            .map_err(|e| DetectorError::Inference(format!("Prediction failed: {}", e)))?;

        let output = outputs.first()
            .ok_or_else(|| DetectorError::Inference("Model produced no outputs".into()))?;
        let scores = output.try_extract::<f32>()
            .map_err(|e| DetectorError::Inference(format!("Unexpected output type: {}", e)))?;
        let score = scores.view().iter().next().copied()
            .ok_or_else(|| DetectorError::Inference("Model output is empty".into()))?;

        Ok(score)
    }
}
