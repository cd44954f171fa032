use std::collections::HashMap;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::filter::median_filter;
use tracing::debug;

use crate::RecognitionEngine;

/// Candidate filtering knobs for [`CaptchaSolver`].
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Exact text length to prefer. Candidates of this length win outright
    /// over any other length.
    pub expected_length: Option<usize>,
    /// Shortest candidate accepted when no exact-length candidate exists.
    pub min_length: usize,
    /// Longest candidate accepted when no exact-length candidate exists.
    pub max_length: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            expected_length: Some(5),
            min_length: 3,
            max_length: 8,
        }
    }
}

/// Turns raw CAPTCHA image bytes into a single best-guess text.
pub trait CaptchaSolve: Send + Sync {
    /// Solve the image, or return `None` when no plausible text was read.
    fn solve(&self, image_bytes: &[u8]) -> Option<String>;
}

/// Multi-variant solver: preprocesses the image several ways, collects
/// candidates from every variant, then picks the plurality winner.
pub struct CaptchaSolver {
    engine: Arc<dyn RecognitionEngine>,
    config: SolverConfig,
}

impl CaptchaSolver {
    /// Build a solver around a recognition backend.
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: SolverConfig) -> Self {
        Self { engine, config }
    }

    /// Preprocessing variants, most reliable first. Each targets a different
    /// distortion: noise, low contrast, thin strokes, small glyphs.
    fn variants(&self, gray: &GrayImage) -> Vec<GrayImage> {
        let mut out = Vec::with_capacity(5);

        let level = otsu_level(gray);
        let binary = threshold(gray, level, ThresholdType::Binary);
        out.push(binary.clone());

        let boosted = DynamicImage::ImageLuma8(gray.clone())
            .adjust_contrast(2.0)
            .to_luma8();
        let boosted_level = otsu_level(&boosted);
        out.push(threshold(&boosted, boosted_level, ThresholdType::Binary));

        out.push(median_filter(gray, 1, 1));

        out.push(
            DynamicImage::ImageLuma8(gray.clone())
                .unsharpen(1.0, 2)
                .to_luma8(),
        );

        // Upscaled binarization helps when the glyphs are small.
        out.push(image::imageops::resize(
            &binary,
            binary.width() * 3,
            binary.height() * 3,
            FilterType::CatmullRom,
        ));

        out
    }

    /// Strip everything except alphanumerics. Case is preserved: the target
    /// input is case-sensitive.
    fn clean(raw: &str) -> String {
        raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
    }

    /// Pick the winning candidate: exact expected length first, then the
    /// fallback length band, decided by plurality with first-seen tiebreak.
    fn pick_candidate(&self, candidates: &[String]) -> Option<String> {
        if let Some(len) = self.config.expected_length {
            let exact: Vec<&String> = candidates.iter().filter(|c| c.len() == len).collect();
            if !exact.is_empty() {
                return vote(&exact);
            }
        }

        let banded: Vec<&String> = candidates
            .iter()
            .filter(|c| c.len() >= self.config.min_length && c.len() <= self.config.max_length)
            .collect();
        vote(&banded)
    }
}

fn vote(candidates: &[&String]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for candidate in candidates {
        let entry = counts.entry(candidate.as_str()).or_insert(0);
        if *entry == 0 {
            first_seen.push(candidate.as_str());
        }
        *entry += 1;
    }

    // Strictly-greater comparison keeps the earliest-seen candidate on ties.
    let mut winner: Option<&str> = None;
    for text in first_seen {
        match winner {
            Some(current) if counts[text] <= counts[current] => {}
            _ => winner = Some(text),
        }
    }
    winner.map(str::to_string)
}

impl CaptchaSolve for CaptchaSolver {
    fn solve(&self, image_bytes: &[u8]) -> Option<String> {
        let decoded = match image::load_from_memory(image_bytes) {
            Ok(img) => img,
            Err(e) => {
                debug!("Failed to decode CAPTCHA image: {}", e);
                return None;
            }
        };

        // Flatten any transparency onto white before grayscaling, otherwise
        // transparent backgrounds binarize to solid black.
        let rgba = decoded.to_rgba8();
        let mut flat = image::RgbImage::new(rgba.width(), rgba.height());
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = pixel.0[3] as u32;
            let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
            flat.put_pixel(
                x,
                y,
                image::Rgb([blend(pixel.0[0]), blend(pixel.0[1]), blend(pixel.0[2])]),
            );
        }
        let gray = DynamicImage::ImageRgb8(flat).to_luma8();

        let mut candidates = Vec::new();
        for variant in self.variants(&gray) {
            for raw in self.engine.recognize(&variant) {
                let cleaned = Self::clean(&raw);
                if !cleaned.is_empty() {
                    candidates.push(cleaned);
                }
            }
        }

        debug!(
            "OCR engine '{}' produced {} candidate(s)",
            self.engine.name(),
            candidates.len()
        );

        self.pick_candidate(&candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine {
        texts: Vec<String>,
    }

    impl RecognitionEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn recognize(&self, _image: &GrayImage) -> Vec<String> {
            self.texts.clone()
        }
    }

    fn solver_with(texts: Vec<&str>) -> CaptchaSolver {
        CaptchaSolver::new(
            Arc::new(FixedEngine {
                texts: texts.into_iter().map(String::from).collect(),
            }),
            SolverConfig::default(),
        )
    }

    fn png_bytes() -> Vec<u8> {
        let img = GrayImage::from_pixel(40, 16, image::Luma([200]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    #[test]
    fn exact_length_candidates_win_and_case_is_preserved() {
        let solver = solver_with(vec![]);
        let picked = solver.pick_candidate(&[
            "Kw2ym".to_string(),
            "kw2y".to_string(),
            "Kw2ymX".to_string(),
        ]);
        assert_eq!(picked.as_deref(), Some("Kw2ym"));
    }

    #[test]
    fn fallback_band_applies_when_no_exact_length_exists() {
        let solver = solver_with(vec![]);
        let picked = solver.pick_candidate(&[
            "ab".to_string(),
            "abcd".to_string(),
            "abcdefghi".to_string(),
        ]);
        assert_eq!(picked.as_deref(), Some("abcd"));
    }

    #[test]
    fn plurality_wins_with_first_seen_tiebreak() {
        let solver = solver_with(vec![]);
        let picked = solver.pick_candidate(&[
            "aaaaa".to_string(),
            "bbbbb".to_string(),
            "bbbbb".to_string(),
        ]);
        assert_eq!(picked.as_deref(), Some("bbbbb"));

        let tied = solver.pick_candidate(&["ccccc".to_string(), "ddddd".to_string()]);
        assert_eq!(tied.as_deref(), Some("ccccc"));

        // Three-way tie still resolves to the earliest-seen candidate.
        let tied = solver.pick_candidate(&[
            "eeeee".to_string(),
            "fffff".to_string(),
            "ggggg".to_string(),
        ]);
        assert_eq!(tied.as_deref(), Some("eeeee"));
    }

    #[test]
    fn candidates_are_cleaned_to_alphanumerics() {
        assert_eq!(CaptchaSolver::clean(" Kw-2 y.m\n"), "Kw2ym");
        assert_eq!(CaptchaSolver::clean("***"), "");
    }

    #[test]
    fn solve_runs_variants_and_returns_plurality_winner() {
        let solver = solver_with(vec!["aB3dE"]);
        let result = solver.solve(&png_bytes());
        assert_eq!(result.as_deref(), Some("aB3dE"));
    }

    #[test]
    fn solve_returns_none_for_undecodable_bytes() {
        let solver = solver_with(vec!["aB3dE"]);
        assert!(solver.solve(b"not an image").is_none());
    }

    #[test]
    fn solve_returns_none_when_engine_sees_nothing() {
        let solver = solver_with(vec![]);
        assert!(solver.solve(&png_bytes()).is_none());
    }
}
