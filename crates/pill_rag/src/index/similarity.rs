// Accumulated in f64: squares of finite f32 components never overflow there.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

/// Cosine similarity with precomputed norms. A zero-norm side scores 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f64, b_norm: f64) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    // `+ 0.0` folds -0.0 into 0.0 so orthogonal hits tie and fall back to id order.
    (dot / (a_norm * b_norm)).clamp(-1.0, 1.0) as f32 + 0.0
}
