/// Generate minibatch intervals
/// * `ntot` - number of total samples
/// * `batch_size` - the size of each batch
pub fn generate_minibatch_intervals(ntot: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let batch_size = batch_size.max(1);
    let num_batches = ntot.div_ceil(batch_size);
    (0..num_batches)
        .map(|b| {
            let lb: usize = b * batch_size;
            let ub: usize = ((b + 1) * batch_size).min(ntot);
            (lb, ub)
        })
        .collect::<Vec<_>>()
}

/// `q`-th quantile (0 ≤ q ≤ 1) by linear interpolation; NaN for empty input
pub fn quantile_f32(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}

/// same as `quantile_f32` on already sorted values
pub fn quantile_sorted(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lb = pos.floor() as usize;
    let ub = pos.ceil() as usize;
    let frac = pos - lb as f32;
    sorted[lb] * (1.0 - frac) + sorted[ub] * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minibatch_intervals() {
        assert_eq!(
            generate_minibatch_intervals(10, 3),
            vec![(0, 3), (3, 6), (6, 9), (9, 10)]
        );
        assert_eq!(generate_minibatch_intervals(6, 3), vec![(0, 3), (3, 6)]);
        assert!(generate_minibatch_intervals(0, 3).is_empty());
    }

    #[test]
    fn quantiles_interpolate() {
        let x = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantile_f32(&x, 0.5), 3.0);
        assert_eq!(quantile_f32(&x, 0.25), 2.0);
        assert_eq!(quantile_f32(&x, 0.125), 1.5);
        assert!(quantile_f32(&[], 0.5).is_nan());
    }
}
