//! Run-length patterns over value sequences.
//!
//! A pattern is a list of [`Wildcard`]s, each matching between `nmin` and
//! `nmax` consecutive values. In JSON a pattern is an array of wildcard
//! objects and literals; a literal matches exactly one equal value.
//!
//! ```json
//! [1, {"nmin": 2, "rejects": [0]}, 1]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use twinsight_core::{equals, Result, TwinError};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Wildcard {
    #[serde(default)]
    pub nmin: usize,
    /// Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nmax: Option<usize>,
    /// Every value is accepted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepts: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejects: Vec<Value>,
}

impl Wildcard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exactly one value equal to `value`.
    pub fn exactly(value: Value) -> Self {
        Self::new().min_values(1).max_values(1).accept(value)
    }

    pub fn min_values(mut self, nmin: usize) -> Self {
        self.nmin = nmin;
        self
    }

    pub fn max_values(mut self, nmax: usize) -> Self {
        self.nmax = Some(nmax);
        self
    }

    pub fn accept(mut self, value: Value) -> Self {
        let accepts = self.accepts.get_or_insert_with(Vec::new);
        if !accepts.iter().any(|a| equals(a, &value)) {
            accepts.push(value);
        }
        self
    }

    pub fn reject(mut self, value: Value) -> Self {
        if !self.rejects.iter().any(|r| equals(r, &value)) {
            self.rejects.push(value);
        }
        self
    }

    pub fn admits(&self, value: &Value) -> bool {
        if self.rejects.iter().any(|r| equals(r, value)) {
            return false;
        }
        match &self.accepts {
            Some(accepts) => accepts.iter().any(|a| equals(a, value)),
            None => true,
        }
    }

    fn max_len(&self) -> usize {
        self.nmax.unwrap_or(usize::MAX)
    }
}

/// Values `start..start + length` of the input matched pattern element
/// `pattern_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSegment {
    pub pattern_index: usize,
    pub start: usize,
    pub length: usize,
}

impl MatchSegment {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatcher {
    pattern: Vec<Wildcard>,
    total_min_length: usize,
}

impl PatternMatcher {
    pub fn new(pattern: Vec<Wildcard>) -> Result<Self> {
        if pattern.is_empty() {
            return Err(TwinError::Validation("Empty pattern given".to_string()));
        }

        for (i, wildcard) in pattern.iter().enumerate() {
            if wildcard.max_len() < wildcard.nmin {
                return Err(TwinError::Validation(format!(
                    "Pattern element {} allows at most {} but requires at least {} values",
                    i,
                    wildcard.max_len(),
                    wildcard.nmin
                )));
            }
        }

        let total_min_length = pattern.iter().map(|w| w.nmin).sum();
        Ok(Self {
            pattern,
            total_min_length,
        })
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        let elements = json.as_array().ok_or_else(|| {
            TwinError::Validation("Input needs to be a pattern in form of an array".to_string())
        })?;

        let pattern = elements
            .iter()
            .map(|element| match element {
                Value::Object(_) => serde_json::from_value::<Wildcard>(element.clone())
                    .map_err(|e| TwinError::Validation(format!("Invalid wildcard {}: {}", element, e))),
                literal => Ok(Wildcard::exactly(literal.clone())),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(pattern)
    }

    /// The compiled pattern; literals appear as exactly-one wildcards.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.pattern
                .iter()
                .map(|w| serde_json::to_value(w).unwrap_or(Value::Null))
                .collect(),
        )
    }

    pub fn pattern(&self) -> &[Wildcard] {
        &self.pattern
    }

    /// Minimum number of values any match spans.
    pub fn total_min_length(&self) -> usize {
        self.total_min_length
    }

    /// First match in `input`: earliest start, shortest runs first.
    pub fn tree_match(&self, input: &[Value]) -> Option<Vec<MatchSegment>> {
        self.search(input, false)
    }

    /// First match whose last segment ends at the last value of `input`.
    pub fn match_at_end(&self, input: &[Value]) -> Option<Vec<MatchSegment>> {
        self.search(input, true)
    }

    pub fn is_match(&self, input: &[Value]) -> bool {
        self.tree_match(input).is_some()
    }

    fn search(&self, input: &[Value], anchored: bool) -> Option<Vec<MatchSegment>> {
        if self.total_min_length > input.len() {
            return None;
        }

        let mut segments = Vec::with_capacity(self.pattern.len());
        for start in 0..=input.len() - self.total_min_length {
            if self.grow(input, 0, start, anchored, &mut segments) {
                trace!(
                    start,
                    segments = segments.len(),
                    anchored,
                    "Pattern match found"
                );
                return Some(segments);
            }
        }

        None
    }

    fn grow(
        &self,
        input: &[Value],
        pattern_index: usize,
        position: usize,
        anchored: bool,
        segments: &mut Vec<MatchSegment>,
    ) -> bool {
        let Some(wildcard) = self.pattern.get(pattern_index) else {
            return !anchored || position == input.len();
        };

        let remaining_min: usize = self.pattern[pattern_index + 1..].iter().map(|w| w.nmin).sum();
        let available = input.len() - position;
        if wildcard.nmin + remaining_min > available {
            return false;
        }
        let longest = wildcard.max_len().min(available - remaining_min);

        for length in 0..=longest {
            if length > 0 && !wildcard.admits(&input[position + length - 1]) {
                break;
            }
            if length < wildcard.nmin {
                continue;
            }

            segments.push(MatchSegment {
                pattern_index,
                start: position,
                length,
            });
            if self.grow(input, pattern_index + 1, position + length, anchored, segments) {
                return true;
            }
            segments.pop();
        }

        false
    }
}
