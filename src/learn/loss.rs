//! Loss functions over the settled walk scores of the labelled nodes.

use crate::error::{ConfigError, ProResult};
use crate::learn::example::PosNegRWExample;

/// Registry names, in display order.
pub const LOSS_NAMES: &[&str] = &["posneg", "normalized"];

/// Scores are clipped into `[BOUND, 1 - BOUND]` before taking logs.
const BOUND: f64 = 1e-15;

/// Per-example loss and its gradient by local feature index.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub loss: f64,
    pub gradient: Vec<f64>,
}

/// A differentiable loss over one example's walk.
pub trait LossFunction: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// `p[u]` is the score of node `u`; `dp[u][f]` its derivative by local feature `f`.
    fn compute(&self, example: &PosNegRWExample, p: &[f64], dp: &[Vec<f64>]) -> LossOutput;
}

/// Build the loss called `name`.
pub fn loss_by_name(name: &str, delta: f64) -> ProResult<Box<dyn LossFunction>> {
    match name {
        "posneg" => Ok(Box::new(PosNegLoss { delta })),
        "normalized" => Ok(Box::new(NormalizedPosLoss)),
        other => Err(ConfigError::UnknownComponent {
            kind: "loss function".into(),
            name: other.into(),
            expected: LOSS_NAMES.join(", "),
        }
        .into()),
    }
}

fn score(p: &[f64], u: usize) -> f64 {
    p.get(u).copied().unwrap_or(0.0)
}

/// Add `scale * dp[u]` into `gradient`.
fn add_scaled(gradient: &mut [f64], dp: &[Vec<f64>], u: usize, scale: f64) {
    if let Some(row) = dp.get(u) {
        for (g, d) in gradient.iter_mut().zip(row) {
            *g += scale * d;
        }
    }
}

// ---------------------------------------------------------------------------
// Pos/neg log loss
// ---------------------------------------------------------------------------

/// `-ln p` for positives and `-beta ln(1 - p)` for negatives.
///
/// With `delta < 0.5` negatives are boosted by
/// `beta = ln(1/h) / ln(1/(1-h))`, `h = max negative score + delta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosNegLoss {
    pub delta: f64,
}

impl PosNegLoss {
    fn beta(&self, example: &PosNegRWExample, p: &[f64]) -> f64 {
        if self.delta >= 0.5 {
            return 1.0;
        }
        let pmax = example.neg.iter().map(|&u| score(p, u)).fold(0.0, f64::max);
        let h = pmax + self.delta;
        if h <= 0.0 || h >= 1.0 {
            return 1.0;
        }
        let beta = (1.0 / h).ln() / (1.0 / (1.0 - h)).ln();
        if beta.is_finite() && beta > 0.0 { beta } else { 1.0 }
    }
}

impl LossFunction for PosNegLoss {
    fn name(&self) -> &'static str {
        "posneg"
    }

    fn compute(&self, example: &PosNegRWExample, p: &[f64], dp: &[Vec<f64>]) -> LossOutput {
        let mut gradient = vec![0.0; example.graph.feature_count()];
        let mut loss = 0.0;
        for &u in &example.pos {
            let pu = score(p, u).clamp(BOUND, 1.0);
            loss -= pu.ln();
            add_scaled(&mut gradient, dp, u, -1.0 / pu);
        }
        let beta = self.beta(example, p);
        for &u in &example.neg {
            let pu = score(p, u).clamp(0.0, 1.0 - BOUND);
            loss -= beta * (1.0 - pu).ln();
            add_scaled(&mut gradient, dp, u, beta / (1.0 - pu));
        }
        LossOutput { loss, gradient }
    }
}

// ---------------------------------------------------------------------------
// Normalized positive loss
// ---------------------------------------------------------------------------

/// `-ln(sum_pos p / sum_labelled p)`: the share of labelled mass on positives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPosLoss;

impl LossFunction for NormalizedPosLoss {
    fn name(&self) -> &'static str {
        "normalized"
    }

    fn compute(&self, example: &PosNegRWExample, p: &[f64], dp: &[Vec<f64>]) -> LossOutput {
        let mut gradient = vec![0.0; example.graph.feature_count()];
        let sum_pos = example.pos.iter().map(|&u| score(p, u)).sum::<f64>().max(BOUND);
        let sum_neg: f64 = example.neg.iter().map(|&u| score(p, u)).sum();
        let sum_all = sum_pos + sum_neg;
        let loss = -(sum_pos / sum_all).ln();
        for &u in &example.pos {
            add_scaled(&mut gradient, dp, u, -1.0 / sum_pos + 1.0 / sum_all);
        }
        for &u in &example.neg {
            add_scaled(&mut gradient, dp, u, 1.0 / sum_all);
        }
        LossOutput { loss, gradient }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> PosNegRWExample {
        PosNegRWExample::parse("q\t2\t3\t3\t2\t2\tf:g\t1->2:1\t1->3:2", None).unwrap()
    }

    #[test]
    fn posneg_gradient_points_away_from_positives() {
        let ex = example();
        let p = [0.0, 0.2, 0.5, 0.3];
        // d p[2] / d f = +1, d p[3] / d g = +1
        let dp = vec![vec![], vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let out = PosNegLoss { delta: 0.5 }.compute(&ex, &p, &dp);
        assert!((out.loss - (-(0.5f64).ln() - (0.7f64).ln())).abs() < 1e-12);
        assert!(out.gradient[0] < 0.0);
        assert!(out.gradient[1] > 0.0);
    }

    #[test]
    fn negatives_are_boosted_below_half_margin() {
        let ex = example();
        let p = [0.0, 0.2, 0.5, 0.1];
        let plain = PosNegLoss { delta: 0.5 }.beta(&ex, &p);
        let boosted = PosNegLoss { delta: 0.2 }.beta(&ex, &p);
        assert_eq!(plain, 1.0);
        assert!(boosted > 1.0);
    }

    #[test]
    fn normalized_loss_vanishes_without_negative_mass() {
        let ex = example();
        let p = [0.0, 0.2, 0.5, 0.0];
        let dp = vec![vec![], vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let out = NormalizedPosLoss.compute(&ex, &p, &dp);
        assert!(out.loss.abs() < 1e-12);
        assert!(out.gradient[0].abs() < 1e-12);
        assert!(out.gradient[1] > 0.0);
    }

    #[test]
    fn unknown_loss_is_rejected() {
        assert!(loss_by_name("hinge", 0.5).is_err());
        assert_eq!(loss_by_name("normalized", 0.5).unwrap().name(), "normalized");
    }
}
