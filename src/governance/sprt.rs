//! Composite sequential probability ratio test.
//!
//! Grounded on `original_source/core/governance/composite_sprt.py`. Per the
//! redesign flag in spec.md §9, dynamic dispatch over hypothesis models is
//! replaced by a tagged enum — `Composite` owns its children by value rather
//! than through a trait object. Only the composite-test variant is
//! implemented; the source's legacy non-composite SPRT path is not
//! reproduced (Open Question 2).

use rand::Rng;

/// A testable hypothesis. `Composite` is a weighted log-sum-exp mixture: a
/// component whose own likelihood is non-finite contributes `-infinity` and
/// is effectively dropped from the mixture rather than poisoning it.
#[derive(Debug, Clone)]
pub enum Hypothesis {
    /// Gaussian with known variance.
    Gaussian { mean: f64, variance: f64 },
    /// Student-t / GLR model for unknown variance.
    StudentT { mean: f64, scale: f64, dof: f64 },
    /// Sub-exponential / GPD-tailed model for the upper tail.
    SubExponential {
        tail_index: f64,
        scale: f64,
        threshold: f64,
    },
    Composite(Vec<(Hypothesis, f64)>),
}

impl Hypothesis {
    pub fn log_likelihood(&self, x: f64) -> f64 {
        match self {
            Hypothesis::Gaussian { mean, variance } => gaussian_log_pdf(x, *mean, *variance),
            Hypothesis::StudentT { mean, scale, dof } => student_t_log_pdf(x, *mean, *scale, *dof),
            Hypothesis::SubExponential {
                tail_index,
                scale,
                threshold,
            } => gpd_log_pdf(x, *tail_index, *scale, *threshold),
            Hypothesis::Composite(children) => {
                let terms: Vec<f64> = children
                    .iter()
                    .map(|(h, w)| {
                        let ll = h.log_likelihood(x);
                        if ll.is_finite() && *w > 0.0 {
                            ll + w.ln()
                        } else {
                            f64::NEG_INFINITY
                        }
                    })
                    .collect();
                log_sum_exp(&terms)
            }
        }
    }
}

fn gaussian_log_pdf(x: f64, mean: f64, variance: f64) -> f64 {
    if variance <= 0.0 {
        return f64::NEG_INFINITY;
    }
    -0.5 * (2.0 * std::f64::consts::PI * variance).ln() - (x - mean).powi(2) / (2.0 * variance)
}

fn student_t_log_pdf(x: f64, mean: f64, scale: f64, dof: f64) -> f64 {
    if scale <= 0.0 || dof <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let z = (x - mean) / scale;
    ln_gamma((dof + 1.0) / 2.0) - ln_gamma(dof / 2.0)
        - 0.5 * (dof * std::f64::consts::PI).ln()
        - scale.ln()
        - ((dof + 1.0) / 2.0) * (1.0 + z * z / dof).ln()
}

/// Generalized Pareto log-density over the excess `x - threshold` (defined
/// for `x >= threshold`; `-infinity` below it).
fn gpd_log_pdf(x: f64, xi: f64, sigma: f64, threshold: f64) -> f64 {
    if sigma <= 0.0 || x < threshold {
        return f64::NEG_INFINITY;
    }
    let y = (x - threshold) / sigma;
    if xi.abs() < 1e-9 {
        -sigma.ln() - y
    } else {
        let base = 1.0 + xi * y;
        if base <= 0.0 {
            return f64::NEG_INFINITY;
        }
        -sigma.ln() - (1.0 / xi + 1.0) * base.ln()
    }
}

/// Lanczos approximation to `ln(Gamma(x))`.
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        (std::f64::consts::PI / (std::f64::consts::PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        let t = x + G + 0.5;
        for (i, c) in COEFFS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Peaks-over-threshold tail index estimate (Hill estimator on the top
/// quartile of positive excesses above the 90th percentile) with a
/// bootstrap confidence interval. Grounded on
/// `composite_sprt.py::SubexponentialModel.sufficient_statistics`.
#[derive(Debug, Clone, Copy)]
pub struct TailEstimate {
    pub tail_index: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub threshold: f64,
}

pub fn estimate_tail_index<R: Rng>(observations: &[f64], bootstrap_samples: usize, rng: &mut R) -> TailEstimate {
    let mut positives: Vec<f64> = observations.iter().copied().filter(|&x| x > 0.0).collect();
    if positives.len() < 10 {
        return TailEstimate {
            tail_index: 2.5,
            ci_low: 2.5,
            ci_high: 2.5,
            threshold: 0.0,
        };
    }
    positives.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let threshold = percentile(&positives, 0.90);
    let excesses: Vec<f64> = positives.iter().copied().filter(|&x| x > threshold).collect();
    if excesses.len() < 4 {
        return TailEstimate {
            tail_index: 2.5,
            ci_low: 2.5,
            ci_high: 2.5,
            threshold,
        };
    }

    let point = hill_estimate(&excesses);
    let mut boots: Vec<f64> = Vec::with_capacity(bootstrap_samples);
    for _ in 0..bootstrap_samples {
        let resample: Vec<f64> = (0..excesses.len())
            .map(|_| excesses[rng.gen_range(0..excesses.len())])
            .collect();
        boots.push(hill_estimate(&resample));
    }
    boots.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let ci_low = percentile(&boots, 0.025);
    let ci_high = percentile(&boots, 0.975);

    TailEstimate {
        tail_index: point,
        ci_low,
        ci_high,
        threshold,
    }
}

/// Hill estimator: tail_index = 1 / mean(log(top k) - log(k-th largest)),
/// with k = len/4 (the upper quartile of the excess sample).
fn hill_estimate(excesses: &[f64]) -> f64 {
    let mut sorted = excesses.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let k = (sorted.len() / 4).max(1);
    let tail = &sorted[sorted.len() - k..];
    let kth = tail[0].max(1e-12);
    let mean_log_excess: f64 =
        tail.iter().map(|&x| x.max(1e-12).ln() - kth.ln()).sum::<f64>() / k as f64;
    if mean_log_excess <= 0.0 {
        2.5
    } else {
        1.0 / mean_log_excess
    }
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SprtDecision {
    Continue,
    AcceptH0,
    AcceptH1,
}

/// A single sequential test instance, keyed by `test_id` by the caller.
#[derive(Debug, Clone)]
pub struct SprtTest {
    pub alpha: f64,
    pub beta: f64,
    pub log_a: f64,
    pub log_b: f64,
    pub llr: f64,
    pub n_samples: u64,
    h0: Hypothesis,
    h1: Hypothesis,
    pub last_decision: SprtDecision,
}

impl SprtTest {
    pub fn new(h0: Hypothesis, h1: Hypothesis, alpha: f64, beta: f64) -> Self {
        let log_a = ((1.0 - beta) / alpha).ln();
        let log_b = (beta / (1.0 - alpha)).ln();
        Self {
            alpha,
            beta,
            log_a,
            log_b,
            llr: 0.0,
            n_samples: 0,
            h0,
            h1,
            last_decision: SprtDecision::Continue,
        }
    }

    /// Folds one observation into the running log-likelihood ratio and
    /// re-evaluates the boundaries. `weight` lets callers discount
    /// low-confidence observations (default 1.0).
    pub fn update(&mut self, x: f64, weight: f64) -> SprtDecision {
        let ll0 = self.h0.log_likelihood(x);
        let ll1 = self.h1.log_likelihood(x);
        self.llr += weight * (ll1 - ll0);
        self.n_samples += 1;

        let decision = if self.llr >= self.log_a {
            SprtDecision::AcceptH1
        } else if self.llr <= self.log_b {
            SprtDecision::AcceptH0
        } else {
            SprtDecision::Continue
        };
        self.last_decision = decision;
        decision
    }

    /// Bounded fraction of alpha/beta scaled by how far the LLR has moved
    /// past its boundary. `None` while the test is still running.
    pub fn alpha_spent(&self) -> Option<f64> {
        match self.last_decision {
            SprtDecision::Continue => None,
            SprtDecision::AcceptH1 => Some(if self.llr > self.log_a {
                (self.alpha * (-(self.llr - self.log_a)).exp()).min(self.alpha)
            } else {
                self.alpha * 0.1
            }),
            SprtDecision::AcceptH0 => Some(if self.llr < self.log_b {
                (self.beta * (-(self.log_b - self.llr)).exp()).min(self.beta)
            } else {
                self.beta * 0.1
            }),
        }
    }

    /// Diagnostic-only p-value from the chi-square(1) asymptote of
    /// `2 * |llr|`. Never drives a decision.
    pub fn diagnostic_p_value(&self) -> f64 {
        let chi2 = 2.0 * self.llr.abs();
        let p = 1.0 - chi_square_1df_cdf(chi2);
        p.clamp(1e-10, 1.0)
    }

    /// Diagnostic confidence in `[0, 1]`, scaled by distance from the
    /// relevant boundary (1.0 deep past a boundary, ~0 near the start of a
    /// still-running test).
    pub fn confidence(&self) -> f64 {
        match self.last_decision {
            SprtDecision::AcceptH1 => (1.0 - (-(self.llr - self.log_a).max(0.0)).exp()).clamp(0.0, 1.0),
            SprtDecision::AcceptH0 => (1.0 - (-(self.log_b - self.llr).max(0.0)).exp()).clamp(0.0, 1.0),
            SprtDecision::Continue => {
                let span = self.log_a - self.log_b;
                if span <= 0.0 {
                    0.0
                } else {
                    ((self.llr - self.log_b) / span).clamp(0.0, 1.0)
                }
            }
        }
    }
}

/// CDF of the chi-square distribution with 1 degree of freedom:
/// `P(X <= x) = erf(sqrt(x/2))`.
fn chi_square_1df_cdf(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        erf((x / 2.0).sqrt())
    }
}

/// Abramowitz-Stegun 7.1.26 approximation of the error function (max error
/// ~1.5e-7), avoiding a dependency on a statistics crate.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254_829_592;
    let a2 = -0.284_496_736;
    let a3 = 1.421_413_741;
    let a4 = -1.453_152_027;
    let a5 = 1.061_405_429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}
