//! Action distributions used by the policy-gradient losses and by action
//! selection. All functions work row-wise: one row per `(batch, agent)` pair.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

const LN_2PI: f32 = 1.837_877_1;

/// Numerically stable `log(softmax(x))` per row.
pub fn log_softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let log_sum = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
        row.mapv_inplace(|x| (x - max) - log_sum);
    }
    out
}

pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    log_softmax(logits).mapv(f32::exp)
}

/// `log π(a)` for one-hot encoded `actions` given row-wise log-probabilities.
pub fn categorical_log_density(actions: ArrayView2<f32>, log_probs: ArrayView2<f32>) -> Array1<f32> {
    (&actions * &log_probs).sum_axis(Axis(1))
}

/// Entropy `-Σ p log p` per row.
pub fn categorical_entropy(log_probs: ArrayView2<f32>) -> Array1<f32> {
    log_probs
        .map_axis(Axis(1), |row| -row.iter().map(|&lp| lp.exp() * lp).sum::<f32>())
}

/// Diagonal Gaussian log-density per row with a state-independent `log_std`.
pub fn gaussian_log_density(
    actions: ArrayView2<f32>,
    means: ArrayView2<f32>,
    log_std: ArrayView1<f32>,
) -> Array1<f32> {
    let mut out = Array1::zeros(actions.nrows());
    Zip::from(&mut out)
        .and(actions.rows())
        .and(means.rows())
        .for_each(|lp, a, mu| {
            *lp = a
                .iter()
                .zip(mu.iter())
                .zip(log_std.iter())
                .map(|((&a, &mu), &ls)| {
                    let var = (2.0 * ls).exp();
                    -(a - mu).powi(2) / (2.0 * var) - ls - 0.5 * LN_2PI
                })
                .sum();
        });
    out
}

/// Draw an index from a probability row.
pub fn sample_categorical<R: Rng + ?Sized>(probs: ArrayView1<f32>, rng: &mut R) -> usize {
    let mut cumsum = 0.0;
    let rand_val: f32 = rng.gen();
    for (i, &p) in probs.iter().enumerate() {
        cumsum += p;
        if rand_val < cumsum {
            return i;
        }
    }
    // rounding left the cumulative sum short of 1
    probs.len().saturating_sub(1)
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax(values: ArrayView1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

pub fn one_hot(index: usize, dim: usize) -> Array1<f32> {
    let mut v = Array1::zeros(dim);
    if index < dim {
        v[index] = 1.0;
    }
    v
}

/// Sample `means + exp(log_std) * ε` row-wise.
pub fn sample_gaussian<R: Rng + ?Sized>(
    means: ArrayView2<f32>,
    log_std: ArrayView1<f32>,
    rng: &mut R,
) -> Array2<f32> {
    let mut out = means.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        for (x, &ls) in row.iter_mut().zip(log_std.iter()) {
            let eps: f32 = StandardNormal.sample(rng);
            *x += ls.exp() * eps;
        }
    }
    out
}
