//! Tape-based reverse-mode automatic differentiation.
//!
//! Records a computation graph (forward pass), then computes all adjoints in a
//! single backward sweep. The node value type is generic: with `f64` nodes the
//! sweep yields the gradient; with [`Dual`](crate::dual::Dual) nodes whose inputs
//! carry a unit tangent in direction `j`, the tangents of the adjoints are column
//! `j` of the Hessian (forward-over-reverse).
//!
//! # Example
//! ```
//! use bf_ad::tape::Tape;
//!
//! let mut tape = Tape::new();
//! let x = tape.var(3.0);
//! let y = tape.var(5.0);
//! let z = tape.mul(x, y);       // z = x * y = 15
//! let w = tape.add(z, x);       // w = z + x = 18
//! tape.backward(w);
//! assert_eq!(tape.adjoint(x), 6.0);  // dw/dx = y + 1 = 6
//! assert_eq!(tape.adjoint(y), 3.0);  // dw/dy = x = 3
//! ```

use crate::scalar::Scalar;

/// Handle to a node on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

#[derive(Debug, Clone, Copy)]
enum Op {
    Input,
    Const,
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Div(usize, usize),
    Neg(usize),
    Ln(usize),
    Exp(usize),
    Powi(usize, i32),
    /// Adjoint passes through only when the input lies inside `[lo, hi]`.
    Clamp(usize, f64, f64),
}

#[derive(Debug, Clone)]
struct Node<T> {
    val: T,
    op: Op,
}

/// Reverse-mode AD tape over node values of type `T`.
#[derive(Debug)]
pub struct GenericTape<T: Scalar> {
    nodes: Vec<Node<T>>,
    adjoints: Vec<T>,
}

/// Tape with plain `f64` values (gradients).
pub type Tape = GenericTape<f64>;

impl<T: Scalar> GenericTape<T> {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self { nodes: Vec::new(), adjoints: Vec::new() }
    }

    /// Create a tape pre-allocated for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { nodes: Vec::with_capacity(capacity), adjoints: Vec::with_capacity(capacity) }
    }

    /// Number of nodes on the tape.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tape is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clear the tape for reuse.
    #[inline]
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.adjoints.clear();
    }

    #[inline]
    fn push(&mut self, val: T, op: Op) -> Var {
        let idx = self.nodes.len();
        self.nodes.push(Node { val, op });
        Var(idx)
    }

    // --- Leaves ---

    /// Record an input variable.
    #[inline]
    pub fn var(&mut self, val: T) -> Var {
        self.push(val, Op::Input)
    }

    /// Record a constant (adjoint never propagated).
    #[inline]
    pub fn constant(&mut self, val: f64) -> Var {
        self.push(T::from_f64(val), Op::Const)
    }

    /// Primal value of a node.
    #[inline]
    pub fn val(&self, v: Var) -> T {
        self.nodes[v.0].val
    }

    // --- Binary ---

    /// `a + b`
    #[inline]
    pub fn add(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val + self.nodes[b.0].val;
        self.push(val, Op::Add(a.0, b.0))
    }

    /// `a - b`
    #[inline]
    pub fn sub(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val - self.nodes[b.0].val;
        self.push(val, Op::Sub(a.0, b.0))
    }

    /// `a * b`
    #[inline]
    pub fn mul(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val * self.nodes[b.0].val;
        self.push(val, Op::Mul(a.0, b.0))
    }

    /// `a / b`
    #[inline]
    pub fn div(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val / self.nodes[b.0].val;
        self.push(val, Op::Div(a.0, b.0))
    }

    // --- Unary ---

    /// `-a`
    #[inline]
    pub fn neg(&mut self, a: Var) -> Var {
        let val = -self.nodes[a.0].val;
        self.push(val, Op::Neg(a.0))
    }

    /// `ln(a)`
    #[inline]
    pub fn ln(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.ln();
        self.push(val, Op::Ln(a.0))
    }

    /// `exp(a)`
    #[inline]
    pub fn exp(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.exp();
        self.push(val, Op::Exp(a.0))
    }

    /// `a^n`
    pub fn powi(&mut self, a: Var, n: i32) -> Var {
        let val = self.nodes[a.0].val.powi(n);
        self.push(val, Op::Powi(a.0, n))
    }

    /// `clamp(a, lo, hi)`
    pub fn clamp(&mut self, a: Var, lo: f64, hi: f64) -> Var {
        let val = self.nodes[a.0].val.clamp_s(lo, hi);
        self.push(val, Op::Clamp(a.0, lo, hi))
    }

    // --- Scalar helpers ---

    /// `a + s`
    #[inline]
    pub fn add_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.add(a, c)
    }

    /// `a * s`
    #[inline]
    pub fn mul_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.mul(a, c)
    }

    /// `a - s`
    #[inline]
    pub fn sub_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.sub(a, c)
    }

    /// Sum of a slice of nodes. An empty slice yields the constant 0.
    pub fn sum(&mut self, terms: &[Var]) -> Var {
        let Some((&first, rest)) = terms.split_first() else {
            return self.constant(0.0);
        };
        rest.iter().fold(first, |acc, &t| self.add(acc, t))
    }

    // --- Backward ---

    /// Run the reverse sweep from output node `out`.
    ///
    /// Afterwards [`adjoint`](GenericTape::adjoint) returns ∂out/∂v for any node.
    pub fn backward(&mut self, out: Var) {
        let n = self.nodes.len();
        let zero = T::from_f64(0.0);
        self.adjoints.clear();
        self.adjoints.resize(n, zero);
        self.adjoints[out.0] = T::from_f64(1.0);

        for i in (0..n).rev() {
            let adj = self.adjoints[i];
            if adj.is_zero() {
                continue;
            }

            match self.nodes[i].op {
                Op::Input | Op::Const => {}
                Op::Add(a, b) => {
                    self.adjoints[a] = self.adjoints[a] + adj;
                    self.adjoints[b] = self.adjoints[b] + adj;
                }
                Op::Sub(a, b) => {
                    self.adjoints[a] = self.adjoints[a] + adj;
                    self.adjoints[b] = self.adjoints[b] - adj;
                }
                Op::Mul(a, b) => {
                    let va = self.nodes[a].val;
                    let vb = self.nodes[b].val;
                    self.adjoints[a] = self.adjoints[a] + adj * vb;
                    self.adjoints[b] = self.adjoints[b] + adj * va;
                }
                Op::Div(a, b) => {
                    let va = self.nodes[a].val;
                    let vb = self.nodes[b].val;
                    self.adjoints[a] = self.adjoints[a] + adj / vb;
                    self.adjoints[b] = self.adjoints[b] - adj * va / (vb * vb);
                }
                Op::Neg(a) => {
                    self.adjoints[a] = self.adjoints[a] - adj;
                }
                Op::Ln(a) => {
                    self.adjoints[a] = self.adjoints[a] + adj / self.nodes[a].val;
                }
                Op::Exp(a) => {
                    self.adjoints[a] = self.adjoints[a] + adj * self.nodes[i].val;
                }
                Op::Powi(a, p) => {
                    let d = T::from_f64(p as f64) * self.nodes[a].val.powi(p - 1);
                    self.adjoints[a] = self.adjoints[a] + adj * d;
                }
                Op::Clamp(a, lo, hi) => {
                    let x = self.nodes[a].val.value();
                    if x >= lo && x <= hi {
                        self.adjoints[a] = self.adjoints[a] + adj;
                    }
                }
            }
        }
    }

    /// Read ∂output/∂v after [`backward`](GenericTape::backward).
    #[inline]
    pub fn adjoint(&self, v: Var) -> T {
        self.adjoints.get(v.0).copied().unwrap_or_else(|| T::from_f64(0.0))
    }
}

impl<T: Scalar> Default for GenericTape<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual::Dual;
    use approx::assert_relative_eq;

    #[test]
    fn test_product_rule() {
        let mut tape = Tape::new();
        let x = tape.var(3.0);
        let y = tape.var(5.0);
        let z = tape.mul(x, y);
        tape.backward(z);
        assert_eq!(tape.val(z), 15.0);
        assert_eq!(tape.adjoint(x), 5.0);
        assert_eq!(tape.adjoint(y), 3.0);
    }

    #[test]
    fn test_fan_out_accumulates() {
        // f = x*x + x, f' = 2x + 1
        let mut tape = Tape::new();
        let x = tape.var(4.0);
        let sq = tape.mul(x, x);
        let f = tape.add(sq, x);
        tape.backward(f);
        assert_eq!(tape.adjoint(x), 9.0);
    }

    #[test]
    fn test_poisson_term_gradient() {
        // f(n) = n - k ln n, f'(n) = 1 - k/n
        let k = 7.0;
        let mut tape = Tape::new();
        let n = tape.var(5.0);
        let ln_n = tape.ln(n);
        let kln = tape.mul_f64(ln_n, k);
        let f = tape.sub(n, kln);
        tape.backward(f);
        assert_relative_eq!(tape.adjoint(n), 1.0 - k / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_div_neg_exp_powi() {
        // f(x, y) = -exp(x) / y + x^3
        let (xv, yv) = (0.4, 2.0);
        let mut tape = Tape::new();
        let x = tape.var(xv);
        let y = tape.var(yv);
        let ex = tape.exp(x);
        let q = tape.div(ex, y);
        let nq = tape.neg(q);
        let c = tape.powi(x, 3);
        let f = tape.add(nq, c);
        tape.backward(f);
        assert_relative_eq!(tape.adjoint(x), -xv.exp() / yv + 3.0 * xv * xv, epsilon = 1e-12);
        assert_relative_eq!(tape.adjoint(y), xv.exp() / (yv * yv), epsilon = 1e-12);
    }

    #[test]
    fn test_clamp_blocks_gradient_outside_interval() {
        let mut tape = Tape::new();
        let x = tape.var(2.0);
        let c = tape.clamp(x, -1.0, 1.0);
        tape.backward(c);
        assert_eq!(tape.val(c), 1.0);
        assert_eq!(tape.adjoint(x), 0.0);

        tape.clear();
        let x = tape.var(0.5);
        let c = tape.clamp(x, -1.0, 1.0);
        tape.backward(c);
        assert_eq!(tape.adjoint(x), 1.0);
    }

    #[test]
    fn test_constant_gets_no_adjoint_propagation() {
        let mut tape = Tape::new();
        let x = tape.var(2.0);
        let f = tape.add_f64(x, 10.0);
        let g = tape.sub_f64(f, 1.0);
        tape.backward(g);
        assert_eq!(tape.val(g), 11.0);
        assert_eq!(tape.adjoint(x), 1.0);
    }

    #[test]
    fn test_sum_helper() {
        let mut tape = Tape::new();
        let xs: Vec<Var> = (1..=4).map(|i| tape.var(i as f64)).collect();
        let s = tape.sum(&xs);
        tape.backward(s);
        assert_eq!(tape.val(s), 10.0);
        for &x in &xs {
            assert_eq!(tape.adjoint(x), 1.0);
        }

        let empty = tape.sum(&[]);
        assert_eq!(tape.val(empty), 0.0);
    }

    #[test]
    fn test_dual_tape_gives_hessian_column() {
        // f(x, y) = x^2 y, H = [[2y, 2x], [2x, 0]]
        let (xv, yv) = (3.0, 2.0);
        let mut tape: GenericTape<Dual> = GenericTape::new();
        let x = tape.var(Dual::new(xv, 1.0));
        let y = tape.var(Dual::new(yv, 0.0));
        let xx = tape.mul(x, x);
        let f = tape.mul(xx, y);
        tape.backward(f);

        let gx = tape.adjoint(x);
        let gy = tape.adjoint(y);
        assert_relative_eq!(gx.val, 2.0 * xv * yv, epsilon = 1e-12);
        assert_relative_eq!(gy.val, xv * xv, epsilon = 1e-12);
        assert_relative_eq!(gx.dot, 2.0 * yv, epsilon = 1e-12);
        assert_relative_eq!(gy.dot, 2.0 * xv, epsilon = 1e-12);
    }

    #[test]
    fn test_reuse_after_clear() {
        let mut tape = Tape::with_capacity(16);
        let x = tape.var(1.0);
        let y = tape.mul_f64(x, 3.0);
        tape.backward(y);
        assert_eq!(tape.adjoint(x), 3.0);

        tape.clear();
        assert!(tape.is_empty());
        let x = tape.var(2.0);
        let y = tape.mul(x, x);
        tape.backward(y);
        assert_eq!(tape.len(), 2);
        assert_eq!(tape.adjoint(x), 4.0);
    }
}
