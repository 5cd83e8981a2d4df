use super::logsumexp;
use super::HiddenMarkovModel;

/// A dynamic programming table. It is a serialized 2-d array, `row` x `column`.
#[derive(Debug, Clone)]
struct DPTable {
    dp: Vec<f64>,
    column: usize,
}

impl DPTable {
    fn new(row: usize, column: usize, x: f64) -> Self {
        Self {
            dp: vec![x; row * column],
            column,
        }
    }
    fn get(&self, t: usize, i: usize) -> f64 {
        self.dp[t * self.column + i]
    }
    fn get_mut(&mut self, t: usize, i: usize) -> &mut f64 {
        &mut self.dp[t * self.column + i]
    }
    fn row(&self, t: usize) -> &[f64] {
        &self.dp[t * self.column..(t + 1) * self.column]
    }
}

/// Forward and backward tables of a sequence, all in log space.
/// `pre[t][i]` is the forward value just before emitting `o_t` at state `i`,
/// so that the derivative with respect to an emission never divides by the emission itself.
#[derive(Debug, Clone)]
pub struct Posterior<'a> {
    model: &'a HiddenMarkovModel,
    obs: &'a [usize],
    pre: DPTable,
    forward: DPTable,
    backward: DPTable,
    lk: f64,
}

impl HiddenMarkovModel {
    fn log_tables(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let ln = |xs: &[f64]| xs.iter().map(|x| x.ln()).collect::<Vec<_>>();
        (
            ln(&self.start),
            ln(&self.end),
            ln(&self.transition),
            ln(&self.emission),
        )
    }
    /// log Pr{obs|self} by the forward algorithm alone, keeping only the last column.
    pub(super) fn forward_likelihood(&self, obs: &[usize]) -> f64 {
        let (n, m) = (self.states, self.symbols);
        let (log_start, log_end, log_trans, log_emit) = self.log_tables();
        let (first, rest) = match obs.split_first() {
            Some(split) => split,
            None => {
                let lks: Vec<_> = log_start.iter().zip(&log_end).map(|(p, q)| p + q).collect();
                return logsumexp(&lks);
            }
        };
        let mut forward: Vec<_> = (0..n).map(|i| log_start[i] + log_emit[i * m + first]).collect();
        let mut next = vec![0f64; n];
        let mut buffer = vec![0f64; n];
        for &o in rest.iter() {
            for (j, slot) in next.iter_mut().enumerate() {
                buffer
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, x)| *x = forward[i] + log_trans[i * n + j]);
                *slot = logsumexp(&buffer) + log_emit[j * m + o];
            }
            std::mem::swap(&mut forward, &mut next);
        }
        buffer
            .iter_mut()
            .zip(&forward)
            .zip(&log_end)
            .for_each(|((x, f), q)| *x = f + q);
        logsumexp(&buffer)
    }
    /// Run forward and backward algorithm on `obs`.
    /// `obs` should only contain symbols smaller than `self.symbols()`.
    pub fn posterior<'a>(&'a self, obs: &'a [usize]) -> Posterior<'a> {
        let (n, m) = (self.states, self.symbols);
        let (log_start, log_end, log_trans, log_emit) = self.log_tables();
        let len = obs.len();
        let mut pre = DPTable::new(len, n, f64::NEG_INFINITY);
        let mut forward = DPTable::new(len, n, f64::NEG_INFINITY);
        let mut backward = DPTable::new(len, n, f64::NEG_INFINITY);
        if len == 0 {
            let lks: Vec<_> = log_start.iter().zip(&log_end).map(|(p, q)| p + q).collect();
            let lk = logsumexp(&lks);
            return Posterior {
                model: self,
                obs,
                pre,
                forward,
                backward,
                lk,
            };
        }
        let mut buffer = vec![0f64; n];
        for i in 0..n {
            *pre.get_mut(0, i) = log_start[i];
            *forward.get_mut(0, i) = log_start[i] + log_emit[i * m + obs[0]];
        }
        for (t, &o) in obs.iter().enumerate().skip(1) {
            for j in 0..n {
                buffer
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, x)| *x = forward.get(t - 1, i) + log_trans[i * n + j]);
                let lk = logsumexp(&buffer);
                *pre.get_mut(t, j) = lk;
                *forward.get_mut(t, j) = lk + log_emit[j * m + o];
            }
        }
        buffer
            .iter_mut()
            .zip(forward.row(len - 1))
            .zip(&log_end)
            .for_each(|((x, f), q)| *x = f + q);
        let lk = logsumexp(&buffer);
        for i in 0..n {
            *backward.get_mut(len - 1, i) = log_end[i];
        }
        for (t, &o) in obs.iter().enumerate().skip(1).rev() {
            for i in 0..n {
                buffer.iter_mut().enumerate().for_each(|(j, x)| {
                    *x = log_trans[i * n + j] + log_emit[j * m + o] + backward.get(t, j)
                });
                *backward.get_mut(t - 1, i) = logsumexp(&buffer);
            }
        }
        Posterior {
            model: self,
            obs,
            pre,
            forward,
            backward,
            lk,
        }
    }
}

impl<'a> Posterior<'a> {
    /// log Pr{obs|model}.
    pub fn log_likelihood(&self) -> f64 {
        self.lk
    }
    /// The backward value at the first position. It should be the same as the log likelihood
    /// after summing up with the initial emissions.
    pub fn backward_likelihood(&self) -> f64 {
        let model = self.model;
        let (log_start, log_end, _, log_emit) = model.log_tables();
        match self.obs.first() {
            Some(&o) => {
                let lks: Vec<_> = (0..model.states)
                    .map(|i| log_start[i] + log_emit[i * model.symbols + o] + self.backward.get(0, i))
                    .collect();
                logsumexp(&lks)
            }
            None => {
                let lks: Vec<_> = log_start.iter().zip(&log_end).map(|(p, q)| p + q).collect();
                logsumexp(&lks)
            }
        }
    }
    /// Write d/d(theta) log Pr{obs|model} into `out`, in the layout of `HiddenMarkovModel::parameters`.
    /// The derivatives are taken with respect to the raw probabilities, ignoring the
    /// sum-to-one constraints. If the likelihood is zero, the result is not finite.
    pub fn derivatives(&self, out: &mut [f64]) {
        let model = self.model;
        let (n, m) = (model.states, model.symbols);
        assert_eq!(out.len(), model.num_parameters());
        let (log_start, log_end, _, log_emit) = model.log_tables();
        let lk = self.lk;
        let len = self.obs.len();
        for (i, block) in out.chunks_exact_mut(model.block_len()).enumerate() {
            block.iter_mut().for_each(|x| *x = 0f64);
            if len == 0 {
                block[0] = (log_end[i] - lk).exp();
                block[1] = (log_start[i] - lk).exp();
                continue;
            }
            block[0] = (log_emit[i * m + self.obs[0]] + self.backward.get(0, i) - lk).exp();
            block[1] = (self.forward.get(len - 1, i) - lk).exp();
            let (trans, emit) = block[2..].split_at_mut(n);
            for (t, &o) in self.obs.iter().enumerate().skip(1) {
                let from = self.forward.get(t - 1, i);
                for (j, slot) in trans.iter_mut().enumerate() {
                    *slot += (from + log_emit[j * m + o] + self.backward.get(t, j) - lk).exp();
                }
            }
            for (t, &o) in self.obs.iter().enumerate() {
                emit[o] += (self.pre.get(t, i) + self.backward.get(t, i) - lk).exp();
            }
        }
    }
}
