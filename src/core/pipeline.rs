use crate::common::config::InferenceConfig;
use crate::common::{DetectorError, Result};
use crate::core::model::ClassifierModel;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use serde::Serialize;
use std::path::Path;

/// Spatial and channel layout the model expects for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub height: u32,
    pub width: u32,
    pub channels: usize,
}

impl InputShape {
    /// Reads `(batch, height, width, channels)`. The batch dimension may be
    /// dynamic; the other three must be known.
    pub fn from_declared(declared: &[Option<usize>]) -> Result<Self> {
        let [_, height, width, channels] = declared else {
            return Err(DetectorError::Shape(format!(
                "Model input shape must be 4D, got {}", format_shape(declared)
            )));
        };

        match (height, width, channels) {
            (Some(h), Some(w), Some(c)) if *h > 0 && *w > 0 && (*c == 1 || *c == 3) => Ok(Self {
                height: *h as u32,
                width: *w as u32,
                channels: *c,
            }),
            _ => Err(DetectorError::Shape(format!(
                "Model input shape needs fixed height and width with 1 or 3 channels, got {}",
                format_shape(declared)
            ))),
        }
    }

    pub fn is_grayscale(&self) -> bool {
        self.channels == 1
    }
}

fn format_shape(declared: &[Option<usize>]) -> String {
    let dims: Vec<String> = declared
        .iter()
        .map(|d| d.map_or_else(|| "None".to_string(), |v| v.to_string()))
        .collect();
    format!("({})", dims.join(", "))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: String,
    pub label_index: usize,
    pub confidence: f32,
}

/// Turns one image file into a verdict from a [`ClassifierModel`].
#[derive(Debug, Clone)]
pub struct InferencePipeline {
    threshold: f32,
    labels: [String; 2],
    filter: FilterType,
}

impl Default for InferencePipeline {
    fn default() -> Self {
        Self::new(&InferenceConfig::default())
    }
}

impl InferencePipeline {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            threshold: config.threshold,
            labels: config.labels.clone(),
            filter: config.resize_filter.filter_type(),
        }
    }

    pub fn labels(&self) -> &[String; 2] {
        &self.labels
    }

    /// Loads `image_path` as a `(1, H, W, C)` tensor with values in `[0, 1]`.
    ///
    /// The declared shape is checked before the file is opened.
    pub fn preprocess(&self, image_path: &Path, declared: &[Option<usize>]) -> Result<Array4<f32>> {
        let shape = InputShape::from_declared(declared)?;

        let img = image::open(image_path).map_err(|e| {
            DetectorError::Inference(format!("Failed to read image {:?}: {}", image_path, e))
        })?;

        Ok(self.image_to_array(&img, shape))
    }

    fn image_to_array(&self, img: &DynamicImage, shape: InputShape) -> Array4<f32> {
        let (width, height) = (shape.width as usize, shape.height as usize);
        if shape.is_grayscale() {
            let gray = DynamicImage::ImageLuma8(img.to_luma8())
                .resize_exact(shape.width, shape.height, self.filter)
                .to_luma8();
            let mut array = Array4::<f32>::zeros((1, height, width, 1));
            for (x, y, pixel) in gray.enumerate_pixels() {
                array[[0, y as usize, x as usize, 0]] = pixel[0] as f32 / 255.0;
            }
            array
        } else {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8())
                .resize_exact(shape.width, shape.height, self.filter)
                .to_rgb8();
            let mut array = Array4::<f32>::zeros((1, height, width, 3));
            for (x, y, pixel) in rgb.enumerate_pixels() {
                for c in 0..3 {
                    array[[0, y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
                }
            }
            array
        }
    }

    /// Maps a raw score to a label. Ties at the threshold go to index 0.
    pub fn interpret(&self, score: f32) -> Result<ClassificationResult> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(DetectorError::Inference(format!(
                "Model score {} is outside [0, 1]", score
            )));
        }

        let label_index = usize::from(score > self.threshold);
        Ok(ClassificationResult {
            label: self.labels[label_index].clone(),
            label_index,
            confidence: score,
        })
    }

    pub fn classify<M>(&self, image_path: &Path, model: &M) -> Result<ClassificationResult>
    where
        M: ClassifierModel + ?Sized,
    {
        let input = self.preprocess(image_path, &model.input_shape())?;
        let score = model.predict(input)?;
        let result = self.interpret(score)?;

        tracing::info!(
            "Classified {:?} as '{}' ({:.2})",
            image_path, result.label, result.confidence
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::cell::Cell;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FixedModel {
        shape: Vec<Option<usize>>,
        score: f32,
        seen: Cell<Option<(usize, usize, usize, usize)>>,
    }

    impl FixedModel {
        fn new(shape: Vec<Option<usize>>, score: f32) -> Self {
            Self { shape, score, seen: Cell::new(None) }
        }
    }

    impl ClassifierModel for FixedModel {
        fn input_shape(&self) -> Vec<Option<usize>> {
            self.shape.clone()
        }

        fn predict(&self, input: Array4<f32>) -> Result<f32> {
            self.seen.set(Some(input.dim()));
            Ok(self.score)
        }
    }

    struct FailingModel;

    impl ClassifierModel for FailingModel {
        fn input_shape(&self) -> Vec<Option<usize>> {
            vec![None, Some(8), Some(8), Some(3)]
        }

        fn predict(&self, _input: Array4<f32>) -> Result<f32> {
            Err(DetectorError::Inference("runtime exploded".into()))
        }
    }

    fn colour_image(dir: &TempDir, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join("xray.png");
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 255])
        });
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn colour_model_gets_nhwc_tensor_in_unit_range() {
        let dir = TempDir::new().unwrap();
        let path = colour_image(&dir, 317, 149);
        let pipeline = InferencePipeline::default();

        let tensor = pipeline
            .preprocess(&path, &[None, Some(224), Some(224), Some(3)])
            .unwrap();
        assert_eq!(tensor.dim(), (1, 224, 224, 3));
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        // Blue channel is saturated everywhere.
        assert!(tensor.slice(ndarray::s![0, .., .., 2]).iter().all(|v| *v > 0.99));
    }

    #[test]
    fn grayscale_model_gets_trailing_channel() {
        let dir = TempDir::new().unwrap();
        let path = colour_image(&dir, 64, 300);
        let pipeline = InferencePipeline::default();

        let tensor = pipeline
            .preprocess(&path, &[None, Some(128), Some(128), Some(1)])
            .unwrap();
        assert_eq!(tensor.dim(), (1, 128, 128, 1));
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn non_square_shape_uses_height_then_width() {
        let dir = TempDir::new().unwrap();
        let path = colour_image(&dir, 40, 40);
        let pipeline = InferencePipeline::default();

        let tensor = pipeline
            .preprocess(&path, &[Some(1), Some(30), Some(50), Some(3)])
            .unwrap();
        assert_eq!(tensor.dim(), (1, 30, 50, 3));
    }

    #[test]
    fn three_dimensional_shape_fails_before_reading_image() {
        let pipeline = InferencePipeline::default();
        let missing = Path::new("/definitely/not/here.png");

        let result = pipeline.preprocess(missing, &[Some(224), Some(224), Some(3)]);
        assert!(matches!(result, Err(DetectorError::Shape(_))));
    }

    #[test]
    fn dynamic_spatial_dims_are_shape_errors() {
        let pipeline = InferencePipeline::default();
        let result = pipeline.preprocess(Path::new("x.png"), &[None, None, None, Some(3)]);
        assert!(matches!(result, Err(DetectorError::Shape(_))));
    }

    #[test]
    fn unsupported_channel_count_is_shape_error() {
        let pipeline = InferencePipeline::default();
        let result = pipeline.preprocess(Path::new("x.png"), &[None, Some(8), Some(8), Some(4)]);
        assert!(matches!(result, Err(DetectorError::Shape(_))));
    }

    #[test]
    fn unreadable_image_is_inference_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-image.png");
        std::fs::write(&path, b"plain text").unwrap();

        let pipeline = InferencePipeline::default();
        let result = pipeline.preprocess(&path, &[None, Some(8), Some(8), Some(3)]);
        assert!(matches!(result, Err(DetectorError::Inference(_))));
    }

    #[test]
    fn threshold_tie_goes_to_first_label() {
        let pipeline = InferencePipeline::default();

        let tie = pipeline.interpret(0.5).unwrap();
        assert_eq!(tie.label_index, 0);
        assert_eq!(tie.label, "fractured");
        assert_eq!(tie.confidence, 0.5);

        let above = pipeline.interpret(0.51).unwrap();
        assert_eq!(above.label_index, 1);
        assert_eq!(above.label, "not fractured");
        assert_eq!(above.confidence, 0.51);
    }

    #[test]
    fn invalid_scores_are_rejected() {
        let pipeline = InferencePipeline::default();
        assert!(matches!(pipeline.interpret(f32::NAN), Err(DetectorError::Inference(_))));
        assert!(matches!(pipeline.interpret(1.2), Err(DetectorError::Inference(_))));
    }

    #[test]
    fn configured_threshold_and_labels_apply() {
        let config = InferenceConfig {
            threshold: 0.8,
            labels: ["positive".into(), "negative".into()],
            ..InferenceConfig::default()
        };
        let pipeline = InferencePipeline::new(&config);
        assert_eq!(pipeline.interpret(0.8).unwrap().label, "positive");
        assert_eq!(pipeline.interpret(0.81).unwrap().label, "negative");
    }

    #[test]
    fn classify_feeds_model_and_reports_raw_score() {
        let dir = TempDir::new().unwrap();
        let path = colour_image(&dir, 20, 10);
        let model = FixedModel::new(vec![None, Some(16), Some(16), Some(1)], 0.51);

        let result = InferencePipeline::default().classify(&path, &model).unwrap();
        assert_eq!(result.label, "not fractured");
        assert_eq!(result.confidence, 0.51);
        assert_eq!(model.seen.get(), Some((1, 16, 16, 1)));
    }

    #[test]
    fn classify_surfaces_prediction_failure() {
        let dir = TempDir::new().unwrap();
        let path = colour_image(&dir, 20, 10);
        let result = InferencePipeline::default().classify(&path, &FailingModel);
        assert!(matches!(result, Err(DetectorError::Inference(msg)) if msg.contains("exploded")));
    }
}
