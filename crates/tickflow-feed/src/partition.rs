//! Symbol-to-worker partitioning.
//!
//! Symbols with a known weight are bin-packed across workers (heaviest first,
//! hot symbols ahead of equal-weight peers); anything else falls back to a
//! stable hash. Both are deterministic across restarts.

use std::collections::HashMap;
use tickflow_core::Symbol;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Minimum weight so zero-weight symbols still spread.
const MIN_WEIGHT: f64 = 0.0001;

/// FNV-1a over the symbol bytes.
pub fn stable_hash(symbol: &str) -> u64 {
    symbol.bytes().fold(FNV_OFFSET, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Worker index for `symbol` among `partitions` workers.
pub fn hash_partition(symbol: &Symbol, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    (stable_hash(symbol.as_str()) % partitions as u64) as usize
}

/// Greedy weighted bin-packing into `partitions` bins.
///
/// Unweighted symbols count as 1.0.
pub fn assign_weighted(
    symbols: &[Symbol],
    weights: &HashMap<Symbol, f64>,
    hot: &[Symbol],
    partitions: usize,
) -> Vec<Vec<Symbol>> {
    let partitions = partitions.max(1);
    let weight_of = |s: &Symbol| weights.get(s).copied().unwrap_or(1.0).max(0.0);

    let mut ordered: Vec<&Symbol> = hot.iter().filter(|s| symbols.contains(s)).collect();
    ordered.extend(symbols.iter().filter(|s| !hot.contains(s)));
    // Stable: hot symbols stay ahead of equal-weight peers
    ordered.sort_by(|a, b| weight_of(b).total_cmp(&weight_of(a)));

    let mut bins: Vec<Vec<Symbol>> = vec![Vec::new(); partitions];
    let mut loads = vec![0.0_f64; partitions];
    for symbol in ordered {
        let idx = loads
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
            .unwrap_or(0);
        bins[idx].push(symbol.clone());
        loads[idx] += weight_of(symbol).max(MIN_WEIGHT);
    }
    bins
}

/// Resolved routing table.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    partitions: usize,
    assigned: HashMap<Symbol, usize>,
}

impl PartitionPlan {
    /// Hash-only routing.
    pub fn hashed(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            assigned: HashMap::new(),
        }
    }

    /// Bin-pack the known symbols; others hash.
    pub fn weighted(
        symbols: &[Symbol],
        weights: &HashMap<Symbol, f64>,
        hot: &[Symbol],
        partitions: usize,
    ) -> Self {
        let bins = assign_weighted(symbols, weights, hot, partitions);
        let assigned = bins
            .into_iter()
            .enumerate()
            .flat_map(|(i, bin)| bin.into_iter().map(move |s| (s, i)))
            .collect();
        Self {
            partitions: partitions.max(1),
            assigned,
        }
    }

    pub fn worker_for(&self, symbol: &Symbol) -> usize {
        self.assigned
            .get(symbol)
            .copied()
            .unwrap_or_else(|| hash_partition(symbol, self.partitions))
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }
}
