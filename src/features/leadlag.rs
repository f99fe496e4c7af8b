//! Hayashi–Yoshida covariance and lead-lag scan across two asynchronous
//! price series. Grounded on `original_source/core/signal/leadlag_hy.py`.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick {
    ts: f64,
    log_price: f64,
}

#[derive(Debug, Clone, Copy)]
struct Return {
    t_prev: f64,
    t: f64,
    r: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeadLagResult {
    pub hy_corr_0: f64,
    pub hy_cov_0: f64,
    pub beta_x_on_y_0: f64,
    pub beta_y_on_x_0: f64,
    pub corr_by_lag: Vec<(f64, f64)>,
    pub best_lag: f64,
    pub best_corr: f64,
}

pub const DEFAULT_LAG_GRID: &[f64] = &[-2.0, -1.0, -0.5, -0.25, 0.0, 0.25, 0.5, 1.0, 2.0];

/// Maintains per-symbol log-price tick series and computes Hayashi–Yoshida
/// covariance/correlation and a lead-lag scan between any two symbols.
pub struct LeadLagTracker {
    max_points: usize,
    window_s: f64,
    series: HashMap<String, VecDeque<Tick>>,
}

impl LeadLagTracker {
    pub fn new(max_points: usize, window_s: f64) -> Self {
        Self {
            max_points,
            window_s,
            series: HashMap::new(),
        }
    }

    pub fn add_tick(&mut self, symbol: &str, ts: f64, price: f64) {
        if price <= 0.0 {
            return;
        }
        let deque = self
            .series
            .entry(symbol.to_string())
            .or_insert_with(VecDeque::new);
        deque.push_back(Tick {
            ts,
            log_price: price.ln(),
        });
        while deque.len() > self.max_points {
            deque.pop_front();
        }
        let cutoff = ts - self.window_s;
        while let Some(front) = deque.front() {
            if front.ts < cutoff {
                deque.pop_front();
            } else {
                break;
            }
        }
    }

    fn returns(&self, symbol: &str) -> Vec<Return> {
        let Some(deque) = self.series.get(symbol) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(deque.len());
        let mut iter = deque.iter();
        let Some(mut prev) = iter.next() else {
            return out;
        };
        for tick in iter {
            if tick.ts > prev.ts {
                let r = tick.log_price - prev.log_price;
                if r.is_finite() {
                    out.push(Return {
                        t_prev: prev.ts,
                        t: tick.ts,
                        r,
                    });
                }
            }
            prev = tick;
        }
        out
    }

    fn shift(returns: &[Return], lag_s: f64) -> Vec<Return> {
        returns
            .iter()
            .map(|r| Return {
                t_prev: r.t_prev + lag_s,
                t: r.t + lag_s,
                r: r.r,
            })
            .collect()
    }

    /// Two-pointer Hayashi–Yoshida overlap sweep: returns `(cov, var_x, var_y)`.
    fn hy_cov(rx: &[Return], ry: &[Return]) -> (f64, f64, f64) {
        let var_x: f64 = rx.iter().map(|r| r.r * r.r).sum();
        let var_y: f64 = ry.iter().map(|r| r.r * r.r).sum();
        let mut cov = 0.0;
        let mut i = 0usize;
        let mut j = 0usize;
        while i < rx.len() && j < ry.len() {
            let a = rx[i];
            let b = ry[j];
            if a.t_prev.max(b.t_prev) < a.t.min(b.t) {
                cov += a.r * b.r;
            }
            if a.t <= b.t {
                i += 1;
            } else {
                j += 1;
            }
        }
        (cov, var_x, var_y)
    }

    /// HY covariance/correlation/betas between `sym_x` and `sym_y` with `sym_y`
    /// shifted forward by `lag_s` (positive lag: `Corr(X_t, Y_{t+lag})`).
    pub fn hy_metrics(&self, sym_x: &str, sym_y: &str, lag_s: f64) -> (f64, f64, f64, f64) {
        let rx = self.returns(sym_x);
        let ry_raw = self.returns(sym_y);
        let ry = if lag_s == 0.0 {
            ry_raw
        } else {
            Self::shift(&ry_raw, lag_s)
        };
        let (cov, var_x, var_y) = Self::hy_cov(&rx, &ry);
        let corr = if var_x <= 0.0 || var_y <= 0.0 {
            0.0
        } else {
            cov / (var_x * var_y).sqrt()
        };
        let beta_x_on_y = if var_y > 0.0 { cov / var_y } else { 0.0 };
        let beta_y_on_x = if var_x > 0.0 { cov / var_x } else { 0.0 };
        (cov, corr, beta_x_on_y, beta_y_on_x)
    }

    pub fn lead_lag_scan(&self, sym_x: &str, sym_y: &str, lags: &[f64]) -> LeadLagResult {
        let (cov0, corr0, beta_xy0, beta_yx0) = self.hy_metrics(sym_x, sym_y, 0.0);

        let mut corr_by_lag = Vec::with_capacity(lags.len());
        let mut best_lag = 0.0;
        let mut best_corr = 0.0;
        let mut best_abs = -1.0;
        for &lag in lags {
            let (_, corr, _, _) = self.hy_metrics(sym_x, sym_y, lag);
            corr_by_lag.push((lag, corr));
            if corr.abs() > best_abs {
                best_abs = corr.abs();
                best_lag = lag;
                best_corr = corr;
            }
        }

        LeadLagResult {
            hy_corr_0: corr0,
            hy_cov_0: cov0,
            beta_x_on_y_0: beta_xy0,
            beta_y_on_x_0: beta_yx0,
            corr_by_lag,
            best_lag,
            best_corr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_correlated_series_has_corr_near_one() {
        let mut t = LeadLagTracker::new(1000, 3600.0);
        for i in 0..20 {
            let ts = i as f64;
            let price = 100.0 + i as f64 * 0.1;
            t.add_tick("X", ts, price);
            t.add_tick("Y", ts, price);
        }
        let (_, corr, _, _) = t.hy_metrics("X", "Y", 0.0);
        assert!((corr - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_price_ticks_are_skipped() {
        let mut t = LeadLagTracker::new(10, 3600.0);
        t.add_tick("X", 0.0, 0.0);
        t.add_tick("X", 1.0, -5.0);
        assert_eq!(t.returns("X").len(), 0);
    }

    #[test]
    fn lead_lag_scan_picks_best_abs_corr() {
        let mut t = LeadLagTracker::new(1000, 3600.0);
        for i in 0..20 {
            t.add_tick("X", i as f64, 100.0 + i as f64 * 0.1);
            t.add_tick("Y", i as f64, 100.0 + i as f64 * 0.1);
        }
        let scan = t.lead_lag_scan("X", "Y", DEFAULT_LAG_GRID);
        assert!(scan.corr_by_lag.len() == DEFAULT_LAG_GRID.len());
        assert!(scan.best_corr.abs() <= 1.0 + 1e-6);
    }
}
