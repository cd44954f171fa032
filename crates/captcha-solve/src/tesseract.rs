use std::path::{Path, PathBuf};
use std::process::Command;

use image::GrayImage;
use tracing::debug;

use crate::{OcrError, RecognitionEngine};

/// Page-segmentation modes tried per image. Single-line, single-word and
/// raw-line modes each recover different failure shapes on short distorted
/// text.
const PSM_MODES: &[&str] = &["7", "8", "13"];

const CHAR_WHITELIST: &str =
    "tessedit_char_whitelist=0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Secondary recognition backend that shells out to the Tesseract CLI.
pub struct TesseractEngine {
    binary: PathBuf,
}

impl TesseractEngine {
    /// Verify the binary is runnable before accepting it as a backend.
    pub fn probe(binary: &Path) -> Result<Self, OcrError> {
        let output = Command::new(binary)
            .arg("--version")
            .output()
            .map_err(|e| OcrError::TesseractUnavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(OcrError::TesseractUnavailable(format!(
                "exit status {}",
                output.status
            )));
        }

        Ok(Self {
            binary: binary.to_path_buf(),
        })
    }

    fn run_once(&self, image_path: &Path, psm: &str) -> Option<String> {
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["--psm", psm, "-c", CHAR_WHITELIST])
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &GrayImage) -> Vec<String> {
        let file = match tempfile::Builder::new().suffix(".png").tempfile() {
            Ok(file) => file,
            Err(e) => {
                debug!("Failed to create temp image for tesseract: {}", e);
                return Vec::new();
            }
        };

        if let Err(e) = image.save(file.path()) {
            debug!("Failed to write temp image for tesseract: {}", e);
            return Vec::new();
        }

        PSM_MODES
            .iter()
            .filter_map(|psm| self.run_once(file.path(), psm))
            .collect()
    }
}
