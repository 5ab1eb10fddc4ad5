//! Nelson rules for statistical process control.
//!
//! Every rule looks at a window of encoded values ordered oldest to newest
//! together with the running mean and standard deviation of the feature.

use serde::{Deserialize, Serialize};

use twinsight_core::{Result, TwinError};
use twinsight_instance::FeatureStat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NelsonRule {
    /// One point more than 3 standard deviations from the mean.
    Out3Se,
    /// Two of three points more than 2 standard deviations from the mean.
    Out2Se,
    /// Four of five points more than 1 standard deviation from the mean.
    Out1Se,
    /// Nine points in a row on the same side of the mean.
    Bias,
    /// Six points in a row steadily increasing or decreasing.
    Trend,
    /// Fourteen points in a row alternating around the mean.
    Alter,
    /// Fifteen points in a row within 1 standard deviation of the mean.
    LowDev,
    /// Eight points in a row outside 1 standard deviation of the mean.
    HighDev,
}

impl NelsonRule {
    pub fn code(self) -> u8 {
        match self {
            NelsonRule::Out3Se => 0,
            NelsonRule::Out2Se => 1,
            NelsonRule::Out1Se => 2,
            NelsonRule::Bias => 3,
            NelsonRule::Trend => 4,
            NelsonRule::Alter => 5,
            NelsonRule::LowDev => 6,
            NelsonRule::HighDev => 7,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => NelsonRule::Out3Se,
            1 => NelsonRule::Out2Se,
            2 => NelsonRule::Out1Se,
            3 => NelsonRule::Bias,
            4 => NelsonRule::Trend,
            5 => NelsonRule::Alter,
            6 => NelsonRule::LowDev,
            7 => NelsonRule::HighDev,
            other => {
                return Err(TwinError::Validation(format!("Invalid Nelson type {} given", other)));
            }
        })
    }

    /// Number of values (current value included) the rule needs.
    pub fn min_value_count(self) -> usize {
        match self {
            NelsonRule::Out3Se => 1,
            NelsonRule::Out2Se => 3,
            NelsonRule::Out1Se => 5,
            NelsonRule::Bias => 9,
            NelsonRule::Trend => 6,
            NelsonRule::Alter => 14,
            NelsonRule::LowDev => 15,
            NelsonRule::HighDev => 8,
        }
    }

    /// Evaluate the rule over `values` (oldest first).
    pub fn evaluate(self, values: &[f64], stat: &FeatureStat) -> bool {
        let Some(mean) = stat.mean else {
            return false;
        };
        let sdev = stat.sdev.unwrap_or(0.0);
        let n = self.min_value_count();

        match self {
            NelsonRule::Out3Se => out_of_band(values, mean, 3.0 * sdev, n, 1),
            NelsonRule::Out2Se => out_of_band(values, mean, 2.0 * sdev, n, 2),
            NelsonRule::Out1Se => out_of_band(values, mean, sdev, n, 4),
            NelsonRule::Bias => bias(values, mean, n),
            NelsonRule::Trend => trend(values, n),
            NelsonRule::Alter => alternating(values, mean, n),
            NelsonRule::LowDev => deviation_run(values, mean, sdev, n, false),
            NelsonRule::HighDev => deviation_run(values, mean, sdev, n, true),
        }
    }
}

impl TryFrom<u8> for NelsonRule {
    type Error = TwinError;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_code(code)
    }
}

impl From<NelsonRule> for u8 {
    fn from(rule: NelsonRule) -> u8 {
        rule.code()
    }
}

/// At least `min_exceed` of the last `window` values lie beyond
/// `mean ± band` on the same side.
fn out_of_band(values: &[f64], mean: f64, band: f64, window: usize, min_exceed: usize) -> bool {
    let upper = mean + band;
    let lower = mean - band;

    let mut above = 0usize;
    let mut below = 0usize;

    for (i, value) in values.iter().enumerate() {
        if *value > upper {
            above += 1;
        }
        if *value < lower {
            below += 1;
        }

        if i >= window {
            let leaving = values[i - window];
            if leaving > upper {
                above -= 1;
            }
            if leaving < lower {
                below -= 1;
            }
        }

        if above >= min_exceed || below >= min_exceed {
            return true;
        }
    }

    false
}

/// Values equal to the mean keep the current run.
fn bias(values: &[f64], mean: f64, run: usize) -> bool {
    let mut count: i64 = 0;

    for value in values {
        if *value > mean {
            count = if count < 0 { 1 } else { count + 1 };
        }
        if *value < mean {
            count = if count > 0 { -1 } else { count - 1 };
        }
        if count.unsigned_abs() as usize >= run {
            return true;
        }
    }

    false
}

/// Counts monotonic steps. Equal neighbours keep the current run.
fn trend(values: &[f64], steps: usize) -> bool {
    let mut count: i64 = 0;

    for pair in values.windows(2) {
        if pair[1] > pair[0] {
            count = if count < 0 { 1 } else { count + 1 };
        }
        if pair[1] < pair[0] {
            count = if count > 0 { -1 } else { count - 1 };
        }
        if count.unsigned_abs() as usize >= steps {
            return true;
        }
    }

    false
}

fn alternating(values: &[f64], mean: f64, run: usize) -> bool {
    let side = |v: f64| {
        if v > mean {
            Some(true)
        } else if v < mean {
            Some(false)
        } else {
            None
        }
    };

    let Some(first) = values.first() else {
        return false;
    };

    let mut previous = side(*first);
    let mut count = 1usize;

    for value in &values[1..] {
        let current = side(*value);
        count = match (previous, current) {
            (Some(a), Some(b)) if a != b => count + 1,
            _ => 1,
        };
        previous = current;

        if count >= run {
            return true;
        }
    }

    count >= run
}

/// Points on the ±1σ boundary count for both variants.
fn deviation_run(values: &[f64], mean: f64, sdev: f64, run: usize, outside: bool) -> bool {
    let upper = mean + sdev;
    let lower = mean - sdev;
    let mut count = 0usize;

    for value in values {
        let on_boundary = *value == upper || *value == lower;
        let counts = on_boundary
            || if outside {
                *value > upper || *value < lower
            } else {
                *value < upper && *value > lower
            };

        count = if counts { count + 1 } else { 0 };

        if count >= run {
            return true;
        }
    }

    false
}
