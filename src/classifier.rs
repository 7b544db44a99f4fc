use crate::config::{InferenceConfig, ModelConfig};
use crate::pool::{InferencePool, PoolError};
use bytes::Bytes;
use image::imageops::FilterType;
use ndarray::{Array, Ix4};
use serde::Serialize;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// One ranked classification result, confidence as a percentage in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("model outputs {model_classes} classes but {label_count} class names are configured")]
    LabelMismatch {
        model_classes: usize,
        label_count: usize,
    },
}

/// Backend seam for the actual model invocation. The production
/// implementation wraps ONNX Runtime sessions; tests substitute mocks.
pub trait ClassifierModel: Send + Sync + 'static {
    /// Dimensionality of the confidence vector the model produces.
    fn output_classes(&self) -> usize;

    /// Runs the model on one preprocessed `(1, H, W, 3)` batch and returns
    /// the raw confidence vector, one float per class.
    fn infer(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, String>;
}

/// Adapter around a [`ClassifierModel`]: decodes raw image bytes, runs the
/// model through the bounded inference pool, and ranks the output.
pub struct Classifier {
    model: Arc<dyn ClassifierModel>,
    labels: Arc<Vec<String>>,
    input_width: u32,
    input_height: u32,
    top_k: usize,
    confidence_threshold: f32,
    pool: InferencePool,
}

impl Classifier {
    /// Fails when the configured label set does not match the model's output
    /// dimensionality. That mismatch would mislabel every prediction, so the
    /// process must not start with it.
    pub fn new(
        model: Arc<dyn ClassifierModel>,
        model_config: &ModelConfig,
        inference_config: &InferenceConfig,
    ) -> Result<Self, ConfigurationError> {
        let model_classes = model.output_classes();
        let label_count = model_config.class_names.len();
        if model_classes != label_count {
            return Err(ConfigurationError::LabelMismatch {
                model_classes,
                label_count,
            });
        }

        Ok(Self {
            model,
            labels: Arc::new(model_config.class_names.clone()),
            input_width: model_config.input_width,
            input_height: model_config.input_height,
            top_k: inference_config.top_k,
            confidence_threshold: inference_config.confidence_threshold,
            pool: InferencePool::new(inference_config.max_workers),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Decode, preprocess, infer and rank. The blocking part runs on the
    /// shared inference pool; callers only await.
    pub async fn classify(&self, frame: Bytes) -> Result<Vec<Prediction>, ClassifierError> {
        let model = self.model.clone();
        let labels = self.labels.clone();
        let (width, height) = (self.input_width, self.input_height);
        let top_k = self.top_k;
        let threshold = self.confidence_threshold;

        self.pool
            .run(move || {
                let input = preprocess(&frame, width, height)?;
                let raw = model.infer(input).map_err(ClassifierError::Inference)?;
                Ok(rank_predictions(&raw, &labels, top_k, threshold))
            })
            .await?
    }
}

/// Decode → RGB → exact resize → scale to [0, 1] → `(1, H, W, 3)` batch.
pub(crate) fn preprocess(
    image_bytes: &[u8],
    width: u32,
    height: u32,
) -> Result<Array<f32, Ix4>, ClassifierError> {
    let reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;
    let decoded = reader
        .decode()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let resized = decoded
        .resize_exact(width, height, FilterType::CatmullRom)
        .to_rgb8();

    let mut input = Array::zeros((1, height as usize, width as usize, 3));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        input[[0, y as usize, x as usize, 0]] = (r as f32) / 255.;
        input[[0, y as usize, x as usize, 1]] = (g as f32) / 255.;
        input[[0, y as usize, x as usize, 2]] = (b as f32) / 255.;
    }

    Ok(input)
}

/// Stable top-K selection over the raw confidence vector: descending by
/// confidence, ascending index on ties, truncated to `top_k`, then filtered
/// by the confidence floor. An empty result is valid.
pub(crate) fn rank_predictions(
    raw: &[f32],
    labels: &[String],
    top_k: usize,
    confidence_threshold: f32,
) -> Vec<Prediction> {
    let mut indices: Vec<usize> = (0..raw.len().min(labels.len())).collect();
    indices.sort_by(|&a, &b| raw[b].total_cmp(&raw[a]));

    indices
        .into_iter()
        .take(top_k)
        .filter_map(|i| {
            let confidence = round_percent(raw[i] * 100.0);
            (confidence >= confidence_threshold).then(|| Prediction {
                label: labels[i].clone(),
                confidence,
            })
        })
        .collect()
}

fn round_percent(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ranks_descending_and_filters_by_floor() {
        let raw = [0.81, 0.04, 0.09, 0.87];
        let labels = labels(&["a", "b", "c", "d"]);

        let predictions = rank_predictions(&raw, &labels, 3, 5.0);

        assert_eq!(
            predictions,
            vec![
                Prediction {
                    label: "d".to_string(),
                    confidence: 87.0
                },
                Prediction {
                    label: "a".to_string(),
                    confidence: 81.0
                },
                Prediction {
                    label: "c".to_string(),
                    confidence: 9.0
                },
            ]
        );
    }

    #[test]
    fn ties_break_toward_lower_index() {
        let raw = [0.4, 0.4, 0.4];
        let labels = labels(&["a", "b", "c"]);

        let predictions = rank_predictions(&raw, &labels, 2, 0.0);

        assert_eq!(predictions[0].label, "a");
        assert_eq!(predictions[1].label, "b");
    }

    #[test]
    fn all_below_floor_yields_empty_result() {
        let raw = [0.01, 0.02, 0.03];
        let labels = labels(&["a", "b", "c"]);

        assert!(rank_predictions(&raw, &labels, 3, 5.0).is_empty());
    }

    #[test]
    fn confidence_is_rounded_to_two_decimals() {
        let raw = [0.87423];
        let labels = labels(&["only"]);

        let predictions = rank_predictions(&raw, &labels, 1, 0.0);
        assert_eq!(predictions[0].confidence, 87.42);
    }

    #[test]
    fn preprocess_produces_batched_nhwc_input() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 60, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(
            &mut Cursor::new(&mut image_data),
            image::ImageFormat::Png,
        )
        .unwrap();

        let input = preprocess(&image_data, 128, 128).unwrap();

        assert_eq!(input.shape(), &[1, 128, 128, 3]);
        assert!((input[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 0, 0, 1]].abs() < 1e-6);
    }

    #[test]
    fn preprocess_rejects_garbage_bytes() {
        let result = preprocess(b"definitely not an image", 128, 128);
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }

    struct MockModel {
        classes: usize,
        raw: Vec<f32>,
    }

    impl ClassifierModel for MockModel {
        fn output_classes(&self) -> usize {
            self.classes
        }

        fn infer(&self, _input: Array<f32, Ix4>) -> Result<Vec<f32>, String> {
            Ok(self.raw.clone())
        }
    }

    fn model_config(class_names: Vec<String>) -> ModelConfig {
        ModelConfig {
            model_dir: PathBuf::from("."),
            onnx_file: "model.onnx".to_string(),
            input_width: 8,
            input_height: 8,
            class_names,
        }
    }

    fn inference_config() -> InferenceConfig {
        InferenceConfig {
            top_k: 3,
            confidence_threshold: 5.0,
            max_workers: 1,
        }
    }

    #[test]
    fn label_mismatch_is_fatal_at_construction() {
        let model = Arc::new(MockModel {
            classes: 4,
            raw: vec![],
        });
        let result = Classifier::new(model, &model_config(labels(&["a", "b"])), &inference_config());

        assert!(matches!(
            result,
            Err(ConfigurationError::LabelMismatch {
                model_classes: 4,
                label_count: 2,
            })
        ));
    }

    #[tokio::test]
    async fn classify_runs_end_to_end_through_the_pool() {
        let model = Arc::new(MockModel {
            classes: 4,
            raw: vec![0.81, 0.04, 0.09, 0.87],
        });
        let classifier = Classifier::new(
            model,
            &model_config(labels(&["a", "b", "c", "d"])),
            &inference_config(),
        )
        .unwrap();

        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(8, 8, Rgb([10, 20, 30]));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(
            &mut Cursor::new(&mut image_data),
            image::ImageFormat::Png,
        )
        .unwrap();

        let predictions = classifier.classify(Bytes::from(image_data)).await.unwrap();

        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].label, "d");
        assert_eq!(predictions[0].confidence, 87.0);
    }

    #[tokio::test]
    async fn classify_surfaces_decode_errors() {
        let model = Arc::new(MockModel {
            classes: 1,
            raw: vec![0.5],
        });
        let classifier = Classifier::new(
            model,
            &model_config(labels(&["only"])),
            &inference_config(),
        )
        .unwrap();

        let result = classifier
            .classify(Bytes::from_static(b"not an image"))
            .await;
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }
}
