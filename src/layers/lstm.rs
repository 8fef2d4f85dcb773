use ndarray::{Array1, Array2, ArrayD, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use serde::{Serialize, Deserialize};
use crate::activations::{sigmoid, sigmoid_derivative, tanh_derivative};
use super::traits::Parameterized;

/// LSTM cell applied to one step at a time.
///
/// The same weights are applied to every row of the input, so callers that
/// need one recurrent state per agent flatten `(batch, agents)` into rows.
/// Each `step` returns an [`LstmStepCache`]; backward through several steps
/// is driven by the caller, newest step first.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LstmCell {
    /// Input size
    pub input_size: usize,
    /// Hidden size (number of LSTM units)
    pub hidden_size: usize,

    // Input gate
    pub w_ii: Array2<f32>, // Input to input gate
    pub w_hi: Array2<f32>, // Hidden to input gate
    pub b_i: Array1<f32>,

    // Forget gate
    pub w_if: Array2<f32>,
    pub w_hf: Array2<f32>,
    pub b_f: Array1<f32>,

    // Cell gate (candidate values)
    pub w_ig: Array2<f32>,
    pub w_hg: Array2<f32>,
    pub b_g: Array1<f32>,

    // Output gate
    pub w_io: Array2<f32>,
    pub w_ho: Array2<f32>,
    pub b_o: Array1<f32>,
}

/// Everything one step needs to run backward.
#[derive(Clone, Debug)]
pub struct LstmStepCache {
    x: Array2<f32>,
    h_prev: Array2<f32>,
    c_prev: Array2<f32>,
    c_next: Array2<f32>,
    input_gate: Array2<f32>,
    forget_gate: Array2<f32>,
    cell_gate: Array2<f32>,
    output_gate: Array2<f32>,
}

/// Accumulated parameter gradients for an [`LstmCell`].
#[derive(Clone, Debug)]
pub struct LstmGrads {
    pub dw_ii: Array2<f32>, pub dw_hi: Array2<f32>, pub db_i: Array1<f32>,
    pub dw_if: Array2<f32>, pub dw_hf: Array2<f32>, pub db_f: Array1<f32>,
    pub dw_ig: Array2<f32>, pub dw_hg: Array2<f32>, pub db_g: Array1<f32>,
    pub dw_io: Array2<f32>, pub dw_ho: Array2<f32>, pub db_o: Array1<f32>,
}

/// Gradients flowing out of one step.
pub struct LstmStepGrads {
    /// Gradient with respect to the step input
    pub dx: Array2<f32>,
    /// Gradient with respect to the previous hidden state
    pub dh_prev: Array2<f32>,
    /// Gradient with respect to the previous cell state
    pub dc_prev: Array2<f32>,
}

impl LstmCell {
    /// Create a new cell with Xavier/Glorot-style uniform weights.
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let scale = (1.0 / (input_size + hidden_size) as f32).sqrt();
        let w = |rows: usize| Array2::random((rows, hidden_size), Uniform::new(-scale, scale));

        Self {
            input_size,
            hidden_size,

            w_ii: w(input_size),
            w_hi: w(hidden_size),
            b_i: Array1::zeros(hidden_size),

            w_if: w(input_size),
            w_hf: w(hidden_size),
            b_f: Array1::ones(hidden_size), // forget gate starts open

            w_ig: w(input_size),
            w_hg: w(hidden_size),
            b_g: Array1::zeros(hidden_size),

            w_io: w(input_size),
            w_ho: w(hidden_size),
            b_o: Array1::zeros(hidden_size),
        }
    }

    /// Zero hidden and cell state for `rows` independent sequences.
    pub fn zero_state(&self, rows: usize) -> (Array2<f32>, Array2<f32>) {
        (
            Array2::zeros((rows, self.hidden_size)),
            Array2::zeros((rows, self.hidden_size)),
        )
    }

    /// Run one step. Returns `(h_next, c_next, cache)`.
    pub fn step(
        &self,
        x: ArrayView2<f32>,
        h: ArrayView2<f32>,
        c: ArrayView2<f32>,
    ) -> (Array2<f32>, Array2<f32>, LstmStepCache) {
        let gate = |w_x: &Array2<f32>, w_h: &Array2<f32>, b: &Array1<f32>| {
            x.dot(w_x) + h.dot(w_h) + &b.view().insert_axis(Axis(0))
        };

        // i_t = sigmoid(x W_ii + h W_hi + b_i), likewise f_t and o_t
        let i_t = gate(&self.w_ii, &self.w_hi, &self.b_i).mapv(sigmoid);
        let f_t = gate(&self.w_if, &self.w_hf, &self.b_f).mapv(sigmoid);
        let g_t = gate(&self.w_ig, &self.w_hg, &self.b_g).mapv(f32::tanh);
        let o_t = gate(&self.w_io, &self.w_ho, &self.b_o).mapv(sigmoid);

        // c_t = f_t * c_{t-1} + i_t * g_t
        let c_next = &f_t * &c + &i_t * &g_t;
        // h_t = o_t * tanh(c_t)
        let h_next = &o_t * &c_next.mapv(f32::tanh);

        let cache = LstmStepCache {
            x: x.to_owned(),
            h_prev: h.to_owned(),
            c_prev: c.to_owned(),
            c_next: c_next.clone(),
            input_gate: i_t,
            forget_gate: f_t,
            cell_gate: g_t,
            output_gate: o_t,
        };
        (h_next, c_next, cache)
    }

    /// Backward through one step given the gradients of its outputs.
    /// Parameter gradients are added into `grads`.
    pub fn backward_step(
        &self,
        cache: &LstmStepCache,
        dh: ArrayView2<f32>,
        dc_next: ArrayView2<f32>,
        grads: &mut LstmGrads,
    ) -> LstmStepGrads {
        let i_t = &cache.input_gate;
        let f_t = &cache.forget_gate;
        let g_t = &cache.cell_gate;
        let o_t = &cache.output_gate;

        let tanh_c = cache.c_next.mapv(f32::tanh);
        let do_t = &dh * &tanh_c;
        let dc = &(&dh * o_t) * &tanh_derivative(&tanh_c) + &dc_next;

        let di_gate = &(&dc * g_t) * &sigmoid_derivative(i_t);
        let df_gate = &(&dc * &cache.c_prev) * &sigmoid_derivative(f_t);
        let dg_gate = &(&dc * i_t) * &tanh_derivative(g_t);
        let do_gate = &do_t * &sigmoid_derivative(o_t);
        let dc_prev = &dc * f_t;

        let x_t = cache.x.t();
        let h_t = cache.h_prev.t();

        grads.dw_ii += &x_t.dot(&di_gate);
        grads.dw_hi += &h_t.dot(&di_gate);
        grads.db_i += &di_gate.sum_axis(Axis(0));

        grads.dw_if += &x_t.dot(&df_gate);
        grads.dw_hf += &h_t.dot(&df_gate);
        grads.db_f += &df_gate.sum_axis(Axis(0));

        grads.dw_ig += &x_t.dot(&dg_gate);
        grads.dw_hg += &h_t.dot(&dg_gate);
        grads.db_g += &dg_gate.sum_axis(Axis(0));

        grads.dw_io += &x_t.dot(&do_gate);
        grads.dw_ho += &h_t.dot(&do_gate);
        grads.db_o += &do_gate.sum_axis(Axis(0));

        let dx = di_gate.dot(&self.w_ii.t())
            + df_gate.dot(&self.w_if.t())
            + dg_gate.dot(&self.w_ig.t())
            + do_gate.dot(&self.w_io.t());

        let dh_prev = di_gate.dot(&self.w_hi.t())
            + df_gate.dot(&self.w_hf.t())
            + dg_gate.dot(&self.w_hg.t())
            + do_gate.dot(&self.w_ho.t());

        LstmStepGrads { dx, dh_prev, dc_prev }
    }
}

impl LstmGrads {
    pub fn zeros(cell: &LstmCell) -> Self {
        let (i, h) = (cell.input_size, cell.hidden_size);
        Self {
            dw_ii: Array2::zeros((i, h)), dw_hi: Array2::zeros((h, h)), db_i: Array1::zeros(h),
            dw_if: Array2::zeros((i, h)), dw_hf: Array2::zeros((h, h)), db_f: Array1::zeros(h),
            dw_ig: Array2::zeros((i, h)), dw_hg: Array2::zeros((h, h)), db_g: Array1::zeros(h),
            dw_io: Array2::zeros((i, h)), dw_ho: Array2::zeros((h, h)), db_o: Array1::zeros(h),
        }
    }

    /// Gradient leaves in `Parameterized` order.
    pub fn into_leaves(self) -> Vec<ArrayD<f32>> {
        vec![
            self.dw_ii.into_dyn(), self.dw_hi.into_dyn(), self.db_i.into_dyn(),
            self.dw_if.into_dyn(), self.dw_hf.into_dyn(), self.db_f.into_dyn(),
            self.dw_ig.into_dyn(), self.dw_hg.into_dyn(), self.db_g.into_dyn(),
            self.dw_io.into_dyn(), self.dw_ho.into_dyn(), self.db_o.into_dyn(),
        ]
    }
}

impl Parameterized for LstmCell {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![
            self.w_ii.view().into_dyn(), self.w_hi.view().into_dyn(), self.b_i.view().into_dyn(),
            self.w_if.view().into_dyn(), self.w_hf.view().into_dyn(), self.b_f.view().into_dyn(),
            self.w_ig.view().into_dyn(), self.w_hg.view().into_dyn(), self.b_g.view().into_dyn(),
            self.w_io.view().into_dyn(), self.w_ho.view().into_dyn(), self.b_o.view().into_dyn(),
        ]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![
            self.w_ii.view_mut().into_dyn(), self.w_hi.view_mut().into_dyn(), self.b_i.view_mut().into_dyn(),
            self.w_if.view_mut().into_dyn(), self.w_hf.view_mut().into_dyn(), self.b_f.view_mut().into_dyn(),
            self.w_ig.view_mut().into_dyn(), self.w_hg.view_mut().into_dyn(), self.b_g.view_mut().into_dyn(),
            self.w_io.view_mut().into_dyn(), self.w_ho.view_mut().into_dyn(), self.b_o.view_mut().into_dyn(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loss(cell: &LstmCell, x: &Array2<f32>) -> f32 {
        let (h0, c0) = cell.zero_state(x.nrows());
        let (h1, c1, _) = cell.step(x.view(), h0.view(), c0.view());
        let (h2, _, _) = cell.step(x.view(), h1.view(), c1.view());
        h2.sum()
    }

    #[test]
    fn test_two_step_backward_matches_finite_difference() {
        let cell = LstmCell::new(3, 4);
        let x = Array2::from_shape_fn((2, 3), |(r, c)| 0.1 * (r as f32 + 1.0) - 0.2 * c as f32);

        let (h0, c0) = cell.zero_state(2);
        let (h1, c1, cache1) = cell.step(x.view(), h0.view(), c0.view());
        let (_h2, _c2, cache2) = cell.step(x.view(), h1.view(), c1.view());

        let mut grads = LstmGrads::zeros(&cell);
        let ones = Array2::ones((2, 4));
        let zeros = Array2::zeros((2, 4));
        let g2 = cell.backward_step(&cache2, ones.view(), zeros.view(), &mut grads);
        cell.backward_step(&cache1, g2.dh_prev.view(), g2.dc_prev.view(), &mut grads);

        let eps = 1e-2;
        let mut plus = cell.clone();
        plus.w_hi[[1, 2]] += eps;
        let mut minus = cell.clone();
        minus.w_hi[[1, 2]] -= eps;
        let numeric = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * eps);
        assert!((numeric - grads.dw_hi[[1, 2]]).abs() < 1e-2,
            "numeric {} vs analytic {}", numeric, grads.dw_hi[[1, 2]]);

        let mut plus = cell.clone();
        plus.b_g[0] += eps;
        let mut minus = cell.clone();
        minus.b_g[0] -= eps;
        let numeric = (loss(&plus, &x) - loss(&minus, &x)) / (2.0 * eps);
        assert!((numeric - grads.db_g[0]).abs() < 1e-2);
    }

    #[test]
    fn test_parameter_order_matches_gradient_order() {
        let cell = LstmCell::new(2, 3);
        let shapes: Vec<Vec<usize>> = cell.parameters().iter().map(|p| p.shape().to_vec()).collect();
        let leaf_shapes: Vec<Vec<usize>> = LstmGrads::zeros(&cell)
            .into_leaves()
            .iter()
            .map(|g| g.shape().to_vec())
            .collect();
        assert_eq!(shapes, leaf_shapes);
    }
}
