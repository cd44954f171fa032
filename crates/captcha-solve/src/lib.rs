//! # Captcha Solve
//!
//! Turns a rendered CAPTCHA image into accepted text: an OCR engine adapter
//! with a neural and a Tesseract backend, a solver that runs several
//! preprocessing variants and takes a plurality vote over the candidates,
//! and a retry controller that drives solve → submit → detect-outcome →
//! refresh loops against a browser page, bounded by a maximum attempt count.

/// CNN used by the neural OCR backend.
pub mod model;

/// OCR engine adapter: the `RecognitionEngine` trait and start-up selection.
mod ocr;
pub use ocr::*;

/// Neural recognition backend on top of the CNN.
mod neural;
pub use neural::*;

/// Tesseract CLI recognition backend.
mod tesseract;
pub use tesseract::*;

/// Image preprocessing, candidate filtering and plurality voting.
mod solver;
pub use solver::*;

/// The bounded solve/submit/refresh retry state machine.
mod controller;
pub use controller::*;

/// WebDriver-backed implementation of the challenge page surface.
mod page;
pub use page::*;
