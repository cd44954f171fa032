use std::path::Path;
use std::sync::Mutex;

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use image::GrayImage;
use image::imageops::FilterType;
use tracing::debug;

use crate::model::{CAPTCHA_LENGTH, IMG_HEIGHT, IMG_WIDTH, Model, class_to_char};
use crate::{OcrError, RecognitionEngine};

/// Compute backend for inference. The `gpu` feature switches to wgpu;
/// the default is CPU via ndarray.
#[cfg(feature = "gpu")]
pub type NnBackend = burn::backend::Wgpu;
/// Compute backend for inference. The `gpu` feature switches to wgpu;
/// the default is CPU via ndarray.
#[cfg(not(feature = "gpu"))]
pub type NnBackend = burn::backend::NdArray;

/// Neural recognition backend: a trained fixed-length CAPTCHA CNN.
pub struct NeuralEngine {
    // The model's lazily-initialized parameter cells are not Sync; the lock
    // serializes inference so the engine can be shared across threads.
    model: Mutex<Model<NnBackend>>,
    device: <NnBackend as Backend>::Device,
}

impl NeuralEngine {
    /// Load trained weights from disk. Failing here is fatal for callers
    /// that have no secondary engine configured.
    pub fn load(path: &Path) -> Result<Self, OcrError> {
        let device = <NnBackend as Backend>::Device::default();
        let model = Model::new(&device);

        let record = BinFileRecorder::<FullPrecisionSettings>::default()
            .load(path.to_path_buf(), &device)
            .map_err(|e| OcrError::ModelLoad(e.to_string()))?;

        Ok(Self {
            model: Mutex::new(model.load_record(record)),
            device,
        })
    }

    /// Human-readable backend name for start-up logs.
    pub fn backend_name(&self) -> &'static str {
        if cfg!(feature = "gpu") { "wgpu" } else { "ndarray" }
    }
}

impl RecognitionEngine for NeuralEngine {
    fn name(&self) -> &'static str {
        "neural"
    }

    fn recognize(&self, image: &GrayImage) -> Vec<String> {
        let resized = image::imageops::resize(
            image,
            IMG_WIDTH as u32,
            IMG_HEIGHT as u32,
            FilterType::Triangle,
        );

        // Normalize pixels to [-1.0, 1.0].
        let mut pixel_data = Vec::with_capacity(IMG_WIDTH * IMG_HEIGHT);
        for pixel in resized.pixels() {
            let val = pixel.0[0] as f32 / 255.0;
            pixel_data.push((val - 0.5) / 0.5);
        }

        let input = Tensor::<NnBackend, 1>::from_floats(pixel_data.as_slice(), &self.device)
            .reshape([1, 1, IMG_HEIGHT, IMG_WIDTH]);

        let model = match self.model.lock() {
            Ok(model) => model,
            Err(_) => return Vec::new(),
        };
        let output = model.forward(input);
        drop(model);

        let predicted = output.argmax(2).reshape([CAPTCHA_LENGTH]);

        let indices: Vec<i64> = match predicted.into_data().to_vec::<i64>() {
            Ok(indices) => indices,
            Err(e) => {
                debug!("Failed to read prediction tensor: {:?}", e);
                return Vec::new();
            }
        };

        let text: String = indices
            .iter()
            .filter_map(|i| class_to_char(*i as usize))
            .collect();

        if text.len() == CAPTCHA_LENGTH {
            vec![text]
        } else {
            Vec::new()
        }
    }
}
