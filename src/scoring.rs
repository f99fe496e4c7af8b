//! Linear score model with optional cross-asset term and pluggable
//! probability calibration. Grounded on `original_source/core/signal/score.py`;
//! the default calibrator is adapted from
//! `cooprefr-bettersys/rust-backend/src/risk.rs`'s `CalibrationRegistry`.

use std::collections::HashMap;

const SCORE_CLAMP: f64 = 40.0;

/// Maps a raw sigmoid probability to a calibrated one. Implementations must
/// be monotone non-decreasing over `[0, 1]`.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, p_raw: f64) -> f64;
}

/// A single calibration bin covering `[lower, upper)` of raw probability.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub calibrated_p: f64,
    pub sample_count: u64,
}

/// Binned empirical calibration table, versioned so callers can tell when
/// the mapping has been refit. Bins with fewer than 5 samples fall back to
/// the raw probability rather than reporting a noisy estimate — mirrors
/// `risk.rs::CalibrationModel`'s `MIN_SAMPLES` guard.
#[derive(Debug, Clone)]
pub struct CalibrationModel {
    pub version: u32,
    bins: Vec<CalibrationBin>,
}

const MIN_CALIBRATION_SAMPLES: u64 = 5;

impl CalibrationModel {
    pub fn new(version: u32, bins: Vec<CalibrationBin>) -> Self {
        Self { version, bins }
    }

    /// A calibrator that always returns its input unchanged (100 uniform
    /// bins, zero samples — used as the default before any bins are fit).
    pub fn identity() -> Self {
        let bins = (0..100)
            .map(|i| CalibrationBin {
                lower: i as f64 / 100.0,
                upper: (i + 1) as f64 / 100.0,
                calibrated_p: (i as f64 + 0.5) / 100.0,
                sample_count: 0,
            })
            .collect();
        Self::new(0, bins)
    }
}

impl Calibrator for CalibrationModel {
    fn calibrate(&self, p_raw: f64) -> f64 {
        let p_raw = p_raw.clamp(0.0, 1.0);
        for bin in &self.bins {
            if p_raw >= bin.lower && p_raw < bin.upper {
                return if bin.sample_count < MIN_CALIBRATION_SAMPLES {
                    p_raw
                } else {
                    bin.calibrated_p
                };
            }
        }
        p_raw
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreComponents {
    pub lin: f64,
    pub intercept: f64,
    pub cross: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreOutput {
    pub raw_score: f64,
    pub p_raw: f64,
    pub p: f64,
    pub components: ScoreComponents,
}

impl ScoreOutput {
    /// Flattens components with a `comp_` prefix, matching
    /// `score.py::ScoreOutput.as_dict()`.
    pub fn as_dict(&self) -> HashMap<String, f64> {
        let mut out = HashMap::with_capacity(6);
        out.insert("raw_score".to_string(), self.raw_score);
        out.insert("p_raw".to_string(), self.p_raw);
        out.insert("p".to_string(), self.p);
        out.insert("comp_lin".to_string(), self.components.lin);
        out.insert("comp_intercept".to_string(), self.components.intercept);
        out.insert("comp_cross".to_string(), self.components.cross);
        out.insert("comp_gamma".to_string(), self.components.gamma);
        out
    }
}

/// `raw_score = w . x + b [+ gamma * beta * r_ref(t - tau*)]`, sigmoid'd and
/// optionally calibrated.
pub struct ScoreModel {
    pub weights: HashMap<String, f64>,
    pub intercept: f64,
    pub gamma: f64,
    pub use_cross_asset: bool,
    pub calibrator: Option<Box<dyn Calibrator>>,
}

impl ScoreModel {
    pub fn new(weights: HashMap<String, f64>, intercept: f64) -> Self {
        Self {
            weights,
            intercept,
            gamma: 0.0,
            use_cross_asset: false,
            calibrator: None,
        }
    }

    pub fn with_cross_asset(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self.use_cross_asset = true;
        self
    }

    pub fn with_calibrator(mut self, calibrator: Box<dyn Calibrator>) -> Self {
        self.calibrator = Some(calibrator);
        self
    }

    /// `features` missing a weighted key contribute zero. `cross_asset`, when
    /// present, is `(beta_i_given_ref, r_ref_lagged)` — the cross term is
    /// only added when `gamma != 0`, `use_cross_asset` is set, and both
    /// values are provided.
    pub fn score(&self, features: &HashMap<String, f64>, cross_asset: Option<(f64, f64)>) -> ScoreOutput {
        let mut lin = 0.0;
        for (name, weight) in &self.weights {
            lin += weight * features.get(name).copied().unwrap_or(0.0);
        }

        let cross = if self.use_cross_asset && self.gamma != 0.0 {
            match cross_asset {
                Some((beta, r_ref)) => self.gamma * beta * r_ref,
                None => 0.0,
            }
        } else {
            0.0
        };

        let raw_score = (lin + self.intercept + cross).clamp(-SCORE_CLAMP, SCORE_CLAMP);
        let p_raw = stable_sigmoid(raw_score);
        let p = match &self.calibrator {
            Some(cal) => cal.calibrate(p_raw),
            None => p_raw,
        };

        ScoreOutput {
            raw_score,
            p_raw,
            p,
            components: ScoreComponents {
                lin,
                intercept: self.intercept,
                cross,
                gamma: self.gamma,
            },
        }
    }
}

/// Numerically stable logistic sigmoid, avoiding overflow for large |x|.
fn stable_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
