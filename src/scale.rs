//! Linear rescaling of continuous controller values

use thiserror::Error;

pub const DEFAULT_MIN: f64 = 0.0;
pub const DEFAULT_MAX: f64 = 127.0;
pub const DEFAULT_TO_MIN: f64 = 0.0;
pub const DEFAULT_TO_MAX: f64 = 10.0;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScaleError {
    #[error("empty input range: min and max are both {0}")]
    EmptyRange(f64),
}

/// Source and target range of a range mapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRange {
    pub min: f64,
    pub max: f64,
    pub to_min: f64,
    pub to_max: f64,
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            to_min: DEFAULT_TO_MIN,
            to_max: DEFAULT_TO_MAX,
        }
    }
}

impl ScaleRange {
    pub fn apply(&self, raw: f64) -> Result<i64, ScaleError> {
        scale(raw, self.min, self.max, self.to_min, self.to_max)
    }
}

/// Map `raw` from `[min, max]` onto `[to_min, to_max]`, rounded to the nearest integer
///
/// Values outside `[min, max]` are extrapolated, not clamped.
pub fn scale(raw: f64, min: f64, max: f64, to_min: f64, to_max: f64) -> Result<i64, ScaleError> {
    if min == max {
        return Err(ScaleError::EmptyRange(min));
    }

    let percent = (raw - min) / (max - min);
    let value = to_min + percent * (to_max - to_min);

    // Half-way values round up: 2.5 -> 3, -2.5 -> -2
    Ok((value + 0.5).floor() as i64)
}
