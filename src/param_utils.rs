use crate::error::LabError;
use std::fmt;
use std::str::FromStr;

/// Value used when an outer-parameter range yields nothing.
pub const FALLBACK_SIGNAL_PARAMETER: f64 = 200.0;
const MAX_DECIMALS: usize = 10;

/// Inclusive `min:max:step` sweep over one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn default_threshold() -> Self {
        Self::new(-1.5, 1.5, 0.1)
    }

    pub fn default_signal_parameter() -> Self {
        Self::new(100.0, 400.0, 50.0)
    }

    pub fn single(value: f64) -> Self {
        Self::new(value, value, 1.0)
    }

    /// Generated values, rounded to the step's decimal precision. Empty when
    /// `min > max` or the step is not a positive finite number.
    pub fn values(&self) -> Vec<f64> {
        if !(self.step.is_finite() && self.step > 0.0) || !self.min.is_finite() || !self.max.is_finite() {
            return Vec::new();
        }
        if self.min > self.max {
            return Vec::new();
        }

        let decimals = step_decimals(self.step);
        let tolerance = self.step * 1e-9;
        let mut values = Vec::new();
        let mut index = 0usize;
        loop {
            let raw = self.min + self.step * index as f64;
            if raw > self.max + tolerance {
                break;
            }
            values.push(round_to(raw, decimals));
            index += 1;
        }
        values
    }

    /// `values()`, falling back to the single default signal parameter when empty.
    pub fn values_or_fallback(&self) -> Vec<f64> {
        let values = self.values();
        if values.is_empty() {
            vec![FALLBACK_SIGNAL_PARAMETER]
        } else {
            values
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), LabError> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(LabError::InvalidRange {
                name: name.to_string(),
                reason: format!("step must be positive (got {})", self.step),
            });
        }
        if self.values().is_empty() {
            return Err(LabError::InvalidRange {
                name: name.to_string(),
                reason: format!("min {} is greater than max {}", self.min, self.max),
            });
        }
        Ok(())
    }
}

impl FromStr for ParameterRange {
    type Err = LabError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| LabError::InvalidRange {
            name: raw.to_string(),
            reason,
        };
        let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
        let numbers = parts
            .iter()
            .map(|part| {
                part.parse::<f64>()
                    .map_err(|_| invalid(format!("{} is not a number", part)))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        match numbers.as_slice() {
            [value] => Ok(Self::single(*value)),
            [min, max, step] => Ok(Self::new(*min, *max, *step)),
            _ => Err(invalid("expected min:max:step".to_string())),
        }
    }
}

impl fmt::Display for ParameterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.min, self.max, self.step)
    }
}

fn step_decimals(step: f64) -> usize {
    let formatted = format!("{}", step);
    formatted
        .split_once('.')
        .map(|(_, fraction)| fraction.len().min(MAX_DECIMALS))
        .unwrap_or(0)
}

fn round_to(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    // Avoid printing "-0".
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
