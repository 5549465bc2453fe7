//! Squashing functions: raw feature dot products to non-negative edge weights.
//!
//! Each function provides its value, its derivative, and the weight assumed
//! for a feature the parameter vector has never seen.

use crate::error::{ConfigError, ProResult};

/// Registry names, in display order.
pub const SQUASHING_FUNCTION_NAMES: &[&str] = &["clipExp", "exp", "linear", "relu", "sigmoid", "tanh"];

/// A scalar transfer function with its derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SquashingFunction {
    /// `e^x` below 1, `e * x` above: exponential growth without overflow.
    ClippedExp,
    Exp,
    Linear,
    #[default]
    ReLU,
    Sigmoid,
    Tanh,
}

impl SquashingFunction {
    /// Resolve a registry name.
    pub fn by_name(name: &str) -> ProResult<Self> {
        Ok(match name {
            "clipExp" | "clippedExp" => Self::ClippedExp,
            "exp" => Self::Exp,
            "linear" => Self::Linear,
            "relu" | "ReLU" => Self::ReLU,
            "sigmoid" => Self::Sigmoid,
            "tanh" => Self::Tanh,
            other => {
                return Err(ConfigError::UnknownComponent {
                    kind: "squashing function".into(),
                    name: other.into(),
                    expected: SQUASHING_FUNCTION_NAMES.join(", "),
                }
                .into());
            }
        })
    }

    pub fn compute(self, x: f64) -> f64 {
        match self {
            Self::ClippedExp => {
                if x < 1.0 {
                    x.exp()
                } else {
                    std::f64::consts::E * x
                }
            }
            Self::Exp => x.exp(),
            Self::Linear => x,
            Self::ReLU => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }

    pub fn compute_derivative(self, x: f64) -> f64 {
        match self {
            Self::ClippedExp => {
                if x < 1.0 {
                    x.exp()
                } else {
                    std::f64::consts::E
                }
            }
            Self::Exp => x.exp(),
            Self::Linear => 1.0,
            Self::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => {
                let s = self.compute(x);
                s * (1.0 - s)
            }
            Self::Tanh => 1.0 - x.tanh().powi(2),
        }
    }

    /// Weight assumed for a feature missing from the parameter vector.
    pub fn default_value(self) -> f64 {
        match self {
            Self::ReLU | Self::Linear => 1.0,
            Self::ClippedExp | Self::Exp | Self::Sigmoid | Self::Tanh => 0.0,
        }
    }

    /// The registry name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ClippedExp => "clipExp",
            Self::Exp => "exp",
            Self::Linear => "linear",
            Self::ReLU => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
        }
    }
}

impl std::fmt::Display for SquashingFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_derivative(f: SquashingFunction, x: f64) -> f64 {
        let h = 1e-6;
        (f.compute(x + h) - f.compute(x - h)) / (2.0 * h)
    }

    #[test]
    fn names_resolve() {
        for name in SQUASHING_FUNCTION_NAMES {
            assert_eq!(SquashingFunction::by_name(name).unwrap().name(), *name);
        }
        assert!(SquashingFunction::by_name("cube").is_err());
    }

    #[test]
    fn clipped_exp_is_continuous_at_one() {
        let f = SquashingFunction::ClippedExp;
        assert!((f.compute(1.0 - 1e-9) - f.compute(1.0)).abs() < 1e-6);
        assert_eq!(f.compute(2.0), 2.0 * std::f64::consts::E);
        assert_eq!(f.default_value(), 0.0);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        for f in [
            SquashingFunction::ClippedExp,
            SquashingFunction::Exp,
            SquashingFunction::Linear,
            SquashingFunction::ReLU,
            SquashingFunction::Sigmoid,
            SquashingFunction::Tanh,
        ] {
            for x in [-1.3, 0.4, 2.5] {
                let d = f.compute_derivative(x);
                assert!((d - numeric_derivative(f, x)).abs() < 1e-4, "{f} at {x}");
            }
        }
    }

    #[test]
    fn relu_defaults() {
        let f = SquashingFunction::ReLU;
        assert_eq!(f.compute(-2.0), 0.0);
        assert_eq!(f.default_value(), 1.0);
        assert_eq!(SquashingFunction::default(), f);
    }
}
