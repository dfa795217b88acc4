// audiofeed-core - Audiobook chapter rendering for podcast feeds
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Duration-balanced partitioning
//!
//! Splits an ordered sequence of units into contiguous groups minimizing the
//! sum of a per-group cost. The solution is exact: dynamic programming over
//! prefix positions, O(n²) cost evaluations.
//!
//! ```text
//! memo[0] = 0
//! memo[i] = min over j < i of memo[j] + cost(units[j..i])
//! ```
//!
//! Back-pointers recorded at each `i` reconstruct the optimal partition.

/// Anything with a duration in seconds
pub trait Scorable {
    fn duration(&self) -> f64;
}

impl Scorable for f64 {
    fn duration(&self) -> f64 {
        *self
    }
}

impl Scorable for f32 {
    fn duration(&self) -> f64 {
        *self as f64
    }
}

impl Scorable for u32 {
    fn duration(&self) -> f64 {
        *self as f64
    }
}

impl Scorable for i32 {
    fn duration(&self) -> f64 {
        *self as f64
    }
}

impl Scorable for u64 {
    fn duration(&self) -> f64 {
        *self as f64
    }
}

/// Cost of one group, given the durations of its members
pub type CostFn = dyn Fn(&[f64]) -> f64 + Send + Sync;

/// Exponential cost, asymmetric about `target` seconds
///
/// Groups longer than `target` cost `(sum - target)^pos_exponent`, shorter
/// ones `|sum - target|^neg_exponent`. With the default exponents an
/// undersized group is penalized harder than an oversized one.
pub fn asymmetric_cost(
    target: f64,
    pos_exponent: f64,
    neg_exponent: f64,
) -> impl Fn(&[f64]) -> f64 + Send + Sync + Clone {
    move |durations: &[f64]| {
        let deviation = durations.iter().sum::<f64>() - target;
        if deviation < 0.0 {
            deviation.abs().powf(neg_exponent)
        } else {
            deviation.powf(pos_exponent)
        }
    }
}

/// `asymmetric_cost` with the default exponents (1.25 over, 1.75 under)
pub fn default_cost(target: f64) -> impl Fn(&[f64]) -> f64 + Send + Sync + Clone {
    asymmetric_cost(target, 1.25, 1.75)
}

#[derive(Debug, Clone, Copy)]
struct MemoEntry {
    score: f64,
    previous_split: Option<usize>,
}

/// Partition `units` into contiguous groups with minimal total cost
///
/// Groups are returned in input order and concatenate back to `units`.
/// Ties go to the earliest split point. Empty input yields no groups.
pub fn segment<'a, T: Scorable>(units: &'a [T], cost: &CostFn) -> Vec<&'a [T]> {
    let durations: Vec<f64> = units.iter().map(Scorable::duration).collect();
    let n = durations.len();

    let mut memo: Vec<MemoEntry> = Vec::with_capacity(n + 1);
    memo.push(MemoEntry {
        score: 0.0,
        previous_split: None,
    });

    for i in 1..=n {
        let mut best = MemoEntry {
            score: f64::INFINITY,
            previous_split: Some(0),
        };
        for (j, entry) in memo.iter().enumerate().take(i) {
            let score = entry.score + cost(&durations[j..i]);
            if score < best.score {
                best = MemoEntry {
                    score,
                    previous_split: Some(j),
                };
            }
        }
        memo.push(best);
    }

    let mut breaks = vec![n];
    let mut current = n;
    while let Some(previous) = memo[current].previous_split {
        breaks.push(previous);
        current = previous;
    }
    breaks.reverse();

    breaks
        .windows(2)
        .map(|w| &units[w[0]..w[1]])
        .collect()
}

/// Total cost of a partition
pub fn partition_cost<T: Scorable>(groups: &[&[T]], cost: &CostFn) -> f64 {
    groups
        .iter()
        .map(|group| {
            let durations: Vec<f64> = group.iter().map(Scorable::duration).collect();
            cost(&durations)
        })
        .sum()
}
