//! Structured-light pattern generation
//!
//! Every pattern is described by `(interval, offset, stride)`: light `i` is
//! lit iff `(i / stride) mod interval == offset`. The modular family uses
//! `stride = 1` and walks every offset of each configured interval. The
//! binary-halving family uses `interval = 2` and halves the stride from
//! `2^(ceil(log2 N) - 1)` down to 1, showing the even then the odd half of
//! each split.
//!
//! Across the whole sequence each light gets a lit/unlit signature. Lights
//! can only be resolved if no two of them share one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CalibrationError, CalibrationResult};

/// Vote contributed by a lit light
pub const LIT_VOTE: i32 = 1;
/// Vote contributed by an unlit light
pub const UNLIT_VOTE: i32 = -1;

/// Pattern family used for a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternScheme {
    /// One pattern per `(interval, offset)` with `offset` in `0..interval`
    Modular { intervals: Vec<usize> },
    /// Halving blocks, even half then odd half
    BinaryHalving,
}

impl Default for PatternScheme {
    fn default() -> Self {
        Self::BinaryHalving
    }
}

/// One illumination pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub interval: usize,
    pub offset: usize,
    pub stride: usize,
}

impl Pattern {
    pub fn new(interval: usize, offset: usize) -> Self {
        Self {
            interval,
            offset,
            stride: 1,
        }
    }

    #[inline]
    pub fn is_lit(&self, light: usize) -> bool {
        (light / self.stride) % self.interval == self.offset
    }

    /// Boolean lit flag for every light
    pub fn lit_mask(&self, light_count: usize) -> Vec<bool> {
        (0..light_count).map(|i| self.is_lit(i)).collect()
    }

    /// Signed vote for every light
    pub fn votes(&self, light_count: usize) -> Vec<i32> {
        (0..light_count)
            .map(|i| if self.is_lit(i) { LIT_VOTE } else { UNLIT_VOTE })
            .collect()
    }
}

/// The ordered patterns of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSequence {
    light_count: usize,
    patterns: Vec<Pattern>,
}

impl PatternSequence {
    /// Generate the sequence for `light_count` lights
    pub fn generate(scheme: &PatternScheme, light_count: usize) -> CalibrationResult<Self> {
        if light_count == 0 {
            return Err(CalibrationError::InvalidConfig(
                "cannot calibrate zero lights".to_string(),
            ));
        }

        let patterns = match scheme {
            PatternScheme::Modular { intervals } => {
                if let Some(&zero) = intervals.iter().find(|&&i| i == 0) {
                    return Err(CalibrationError::InvalidConfig(format!(
                        "pattern interval {} is not allowed",
                        zero
                    )));
                }
                intervals
                    .iter()
                    .flat_map(|&interval| (0..interval).map(move |offset| Pattern::new(interval, offset)))
                    .collect()
            }
            PatternScheme::BinaryHalving => {
                let bits = usize::BITS - (light_count - 1).leading_zeros();
                let mut patterns = Vec::with_capacity(bits as usize * 2);
                for level in (0..bits.max(1)).rev() {
                    let stride = 1usize << level;
                    patterns.push(Pattern { interval: 2, offset: 0, stride });
                    patterns.push(Pattern { interval: 2, offset: 1, stride });
                }
                patterns
            }
        };

        Ok(Self {
            light_count,
            patterns,
        })
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Lit flags of `light` across the whole sequence
    pub fn signature(&self, light: usize) -> Vec<bool> {
        self.patterns.iter().map(|p| p.is_lit(light)).collect()
    }

    /// Fail with the first pair of lights sharing a signature
    pub fn validate_distinguishable(&self) -> CalibrationResult<()> {
        let mut seen: HashMap<Vec<bool>, usize> = HashMap::with_capacity(self.light_count);
        for light in 0..self.light_count {
            let signature = self.signature(light);
            if let Some(&first) = seen.get(&signature) {
                return Err(CalibrationError::Indistinguishable {
                    first,
                    second: light,
                });
            }
            seen.insert(signature, light);
        }
        Ok(())
    }
}
