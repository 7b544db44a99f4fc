use crate::classifier::ClassifierModel;
use crate::config::ModelConfig;
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX Runtime implementation of [`ClassifierModel`].
///
/// `Session::run` needs `&mut self`, so one session per pool worker is kept
/// behind a mutex and requests pick one round-robin. A warmup inference at
/// construction determines the output dimensionality and primes the
/// execution plan before the first real request.
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
    output_classes: usize,
}

impl OrtClassifier {
    pub fn new(
        model_config: &ModelConfig,
        num_sessions: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit()?;

        let sessions = (0..num_sessions.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let output_name = {
            let session = sessions[0]
                .lock()
                .map_err(|e| format!("session mutex poisoned: {}", e))?;
            session.outputs[0].name.clone()
        };

        tracing::info!("Created {} ONNX sessions", sessions.len());

        let mut classifier = Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
            output_classes: 0,
        };

        let probe = Array::zeros((
            1,
            model_config.input_height as usize,
            model_config.input_width as usize,
            3,
        ));
        let raw = classifier.run_model(&probe)?;
        classifier.output_classes = raw.len();
        tracing::info!("Model warmup complete, {} output classes", raw.len());

        Ok(classifier)
    }

    fn run_model(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, String> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| format!("session mutex poisoned: {}", e))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| format!("failed to build tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| format!("inference failed: {}", e))?;

        let (_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("failed to extract tensor: {}", e))?;

        Ok(data.to_vec())
    }
}

impl ClassifierModel for OrtClassifier {
    fn output_classes(&self) -> usize {
        self.output_classes
    }

    fn infer(&self, input: Array<f32, Ix4>) -> Result<Vec<f32>, String> {
        self.run_model(&input)
    }
}
