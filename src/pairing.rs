//! Greedy pairing of occupied positions for the 2-probe head.
//!
//! Both probes of the head move together, so two positions can only be served
//! in one motion when their indices are at least `sep` apart. Given the occupied
//! indices along one column (or row), [`pair_indices`] builds the largest set of
//! disjoint pairs it can find greedily:
//!
//! 1. enumerate every pair `(a, b)` (input order, `a` before `b`) with `|a - b| >= sep`
//! 2. stable-sort the candidates by their larger member, ascending
//! 3. take the first candidate, drop every other candidate sharing an endpoint, repeat
//! 4. append the indices that were never paired, in input order
//!
//! This is a greedy matching, not a globally optimal one. Protocols depend on the
//! resulting well order, so the tie-break (sort order, then input order) is part of
//! the contract.

/// Result of pairing one line of occupied indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pairing {
    /// Selected pairs, in selection order.
    pub pairs: Vec<(usize, usize)>,
    /// Indices left without a partner, in input order.
    pub singles: Vec<usize>,
}

impl Pairing {
    /// Pairs flattened, followed by the leftover singles.
    pub fn flatten(&self) -> Vec<usize> {
        self.pairs
            .iter()
            .flat_map(|&(a, b)| [a, b])
            .chain(self.singles.iter().copied())
            .collect()
    }
}

/// Computes the greedy pairing of `indices` under minimum separation `sep`.
pub fn pair_indices(indices: &[usize], sep: usize) -> Pairing {
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (i, &a) in indices.iter().enumerate() {
        for &b in &indices[i + 1..] {
            if a.abs_diff(b) >= sep {
                candidates.push((a, b));
            }
        }
    }
    // stable: equal maxima keep enumeration order
    candidates.sort_by_key(|&(a, b)| a.max(b));

    let mut used: Vec<usize> = Vec::new();
    let mut pairs = Vec::new();
    for (a, b) in candidates {
        if used.contains(&a) || used.contains(&b) {
            continue;
        }
        used.push(a);
        used.push(b);
        pairs.push((a, b));
    }

    let singles = indices
        .iter()
        .copied()
        .filter(|i| !used.contains(i))
        .collect();

    Pairing { pairs, singles }
}

/// Convenience wrapper returning `sorted_pairs_flattened + leftover_singles`.
pub fn pair_order(indices: &[usize], sep: usize) -> Vec<usize> {
    pair_indices(indices, sep).flatten()
}
