//! Recursive midpoint bisection between two keyframes.
//!
//! For factor `n` the interval `[A, B]` is split into `n` equal steps. The true
//! midpoint is computed first from the endpoints, then each half is bisected
//! using the frames already produced, level by level:
//!
//! ```text
//! x8:  M4 = (A, B)
//!      M2 = (A, M4)   M6 = (M4, B)
//!      M1 = (A, M2)   M3 = (M2, M4)   M5 = (M4, M6)   M7 = (M6, B)
//! ```
//!
//! Every slot is computed exactly once, so a pair costs `n - 1` calls.

use anyhow::{anyhow, Result};

use crate::config::GenerationFactor;
use crate::frame::Frame;
use crate::interpolator::PairwiseInterpolator;

pub struct InterpolationScheduler<'a> {
    interpolator: &'a PairwiseInterpolator,
    factor: GenerationFactor,
}

impl<'a> InterpolationScheduler<'a> {
    pub fn new(interpolator: &'a PairwiseInterpolator, factor: GenerationFactor) -> Self {
        Self { interpolator, factor }
    }

    /// The `factor - 1` in-between frames, ordered from `a` towards `b`.
    pub fn generate(&self, a: &Frame, b: &Frame) -> Result<Vec<Frame>> {
        let n = self.factor.value();
        // slots[i] holds the frame at time (i + 1) / n.
        let mut slots: Vec<Option<Frame>> = vec![None; n - 1];

        let mut step = n;
        while step > 1 {
            let half = step / 2;
            for left in (0..n).step_by(step) {
                let right = left + step;
                let mid = {
                    let l = endpoint(&slots, left, n, a, b)?;
                    let r = endpoint(&slots, right, n, a, b)?;
                    self.interpolator.interpolate(l, r)?
                };
                slots[left + half - 1] = Some(mid);
            }
            step = half;
        }

        slots
            .into_iter()
            .collect::<Option<Vec<Frame>>>()
            .ok_or_else(|| anyhow!("bisection left a slot empty"))
    }
}

/// Frame at position `t` of `n`: the keyframes at the ends, a computed slot inside.
fn endpoint<'f>(slots: &'f [Option<Frame>], t: usize, n: usize, a: &'f Frame, b: &'f Frame) -> Result<&'f Frame> {
    match t {
        0 => Ok(a),
        t if t == n => Ok(b),
        t => slots[t - 1].as_ref().ok_or_else(|| anyhow!("slot {} used before it was computed", t)),
    }
}
