//! Order statistics used by every aggregation step.

use std::collections::BTreeMap;

/// Median of the finite values in `values`, or `None` when there are none.
///
/// Even-length inputs average the two middle values. The result does not
/// depend on input order.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median over the `Some` entries of an optional series.
pub fn median_of_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let present: Vec<f64> = values.into_iter().flatten().collect();
    median(&present)
}

/// Most frequent key of a histogram; ties go to the lexicographically smallest key.
pub fn mode(histogram: &BTreeMap<String, usize>) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for (key, &count) in histogram {
        if count == 0 {
            continue;
        }
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((key, count)),
        }
    }
    best.map(|(k, _)| k.clone())
}
