//! # Dimension Gating
//!
//! Deterministic anti-gaming floor: a declared level only stands when every
//! dimension clears the fixed threshold table for that level. The tables are
//! strictly monotone per level, so loosening any dimension can never lower
//! the gated level.

use crate::assurance::score::DimensionScores;

/// Minimum (capability, coverage, reliability, methodology, freshness,
/// independence, consistency) per declared level. L0 has no thresholds.
const THRESHOLDS: [[u8; 7]; 4] = [
    // L1
    [40, 30, 30, 25, 20, 20, 30],
    // L2
    [55, 45, 45, 40, 35, 35, 45],
    // L3
    [70, 60, 60, 55, 50, 55, 60],
    // L4
    [80, 75, 75, 70, 65, 70, 75],
];

/// The threshold row for a level (1-4).
#[must_use]
pub const fn thresholds_for(level: u8) -> Option<&'static [u8; 7]> {
    match level {
        1..=4 => Some(&THRESHOLDS[level as usize - 1]),
        _ => None,
    }
}

/// Lower the declared level to the highest `k ≤ declared` whose full
/// threshold row is met. Returns the gated level and its rule trace.
#[must_use]
pub fn apply_dimension_gating(declared: u8, dims: &DimensionScores) -> (u8, Vec<String>) {
    let declared = declared.min(4);
    if declared == 0 {
        return (0, vec!["dimension gating not applicable at L0".to_string()]);
    }

    let mut trace = Vec::new();
    for k in (1..=declared).rev() {
        let row = THRESHOLDS[k as usize - 1];
        match first_shortfall(dims, &row) {
            None => {
                if k == declared {
                    trace.push(format!("dimension gating passed at L{k}"));
                } else {
                    trace.push(format!("dimension gating lowered L{declared} to L{k}"));
                }
                return (k, trace);
            }
            Some((name, value, needed)) => {
                trace.push(format!("L{k} gate not met: {name} {value} < {needed}"));
            }
        }
    }

    trace.push(format!("dimension gating lowered L{declared} to L0"));
    (0, trace)
}

fn first_shortfall(
    dims: &DimensionScores, row: &[u8; 7],
) -> Option<(&'static str, u8, u8)> {
    dims.named()
        .iter()
        .zip(row.iter())
        .find(|((_, value), needed)| value < needed)
        .map(|((name, value), needed)| (*name, *value, *needed))
}
