//! A tiny implementation of discrete hidden Markov models, used as a derivative provider.
use crate::error::{FisherError, Result};
use crate::provider::DerivativeProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
mod derivative;
pub use derivative::Posterior;

/// Discrete HMM with an explicit start and end distribution.
/// As in the usual textbook, Pr{O} = sum_{s} p_{s_0} b_{s_0}(o_0) a_{s_0 s_1} b_{s_1}(o_1) ... q_{s_T-1}.
/// The end probability `q` is not normalized together with the transitions;
/// it is a separate distribution over the state in which the sequence ends.
/// The free parameters are laid out per state `i` as
/// `[p_i, q_i, a_i0, ..., a_i(N-1), b_i0, ..., b_i(M-1)]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HiddenMarkovModel {
    states: usize,
    symbols: usize,
    /// Pr{Start -> i}
    start: Vec<f64>,
    /// Pr{i -> End}
    end: Vec<f64>,
    /// N * i + j = Pr{i -> j}
    transition: Vec<f64>,
    /// M * i + k = Pr{k | i}
    emission: Vec<f64>,
}

fn normalize(xs: &[f64]) -> Option<Vec<f64>> {
    let sum: f64 = xs.iter().sum();
    if !(sum > 0f64) || !sum.is_finite() {
        return None;
    }
    Some(xs.iter().map(|x| x / sum).collect())
}

fn normalize_rows(xs: &[f64], column: usize) -> Option<Vec<f64>> {
    let mut normed = Vec::with_capacity(xs.len());
    for row in xs.chunks_exact(column) {
        normed.extend(normalize(row)?);
    }
    Some(normed)
}

impl HiddenMarkovModel {
    /// Create a new HMM. Each distribution is normalized to sum up to one.
    /// Returns `InvalidModel` when the shapes are inconsistent,
    /// a value is negative/non-finite, or a distribution sums to zero.
    pub fn new(
        states: usize,
        symbols: usize,
        start: &[f64],
        end: &[f64],
        transition: &[f64],
        emission: &[f64],
    ) -> Result<Self> {
        if states == 0 || symbols == 0 {
            let msg = format!("empty model ({} states, {} symbols)", states, symbols);
            return Err(FisherError::InvalidModel(msg));
        }
        let shapes = [
            ("start", start.len(), states),
            ("end", end.len(), states),
            ("transition", transition.len(), states * states),
            ("emission", emission.len(), states * symbols),
        ];
        for &(name, found, expected) in shapes.iter() {
            if found != expected {
                let msg = format!("{} has {} values, expected {}", name, found, expected);
                return Err(FisherError::InvalidModel(msg));
            }
        }
        let all = start.iter().chain(end).chain(transition).chain(emission);
        if let Some(x) = all.copied().find(|x| !(0f64 <= *x) || !x.is_finite()) {
            return Err(FisherError::InvalidModel(format!("bad probability {}", x)));
        }
        let err = |name: &str| FisherError::InvalidModel(format!("{} sums up to zero", name));
        Ok(Self {
            states,
            symbols,
            start: normalize(start).ok_or_else(|| err("start"))?,
            end: normalize(end).ok_or_else(|| err("end"))?,
            transition: normalize_rows(transition, states).ok_or_else(|| err("transition"))?,
            emission: normalize_rows(emission, symbols).ok_or_else(|| err("emission"))?,
        })
    }
    pub fn states(&self) -> usize {
        self.states
    }
    pub fn symbols(&self) -> usize {
        self.symbols
    }
    pub fn start(&self, i: usize) -> f64 {
        self.start[i]
    }
    pub fn end(&self, i: usize) -> f64 {
        self.end[i]
    }
    pub fn transition(&self, from: usize, to: usize) -> f64 {
        self.transition[from * self.states + to]
    }
    pub fn emission(&self, state: usize, symbol: usize) -> f64 {
        self.emission[state * self.symbols + symbol]
    }
    /// Number of free parameters, `N * (N + M + 2)`.
    pub fn num_parameters(&self) -> usize {
        self.states * self.block_len()
    }
    // Length of the parameter block of each state.
    fn block_len(&self) -> usize {
        2 + self.states + self.symbols
    }
    /// Every parameter, flattened in the layout used by the derivatives.
    pub fn parameters(&self) -> Vec<f64> {
        let mut params = Vec::with_capacity(self.num_parameters());
        for i in 0..self.states {
            params.push(self.start[i]);
            params.push(self.end[i]);
            params.extend_from_slice(&self.transition[i * self.states..(i + 1) * self.states]);
            params.extend_from_slice(&self.emission[i * self.symbols..(i + 1) * self.symbols]);
        }
        params
    }
    /// Inverse of `parameters`. The values are taken as they are, without normalization.
    /// It is useful to perturb a single parameter.
    pub fn with_parameters(&self, params: &[f64]) -> Result<Self> {
        if params.len() != self.num_parameters() {
            let msg = format!("{} parameters, expected {}", params.len(), self.num_parameters());
            return Err(FisherError::InvalidModel(msg));
        }
        let mut model = self.clone();
        for (i, block) in params.chunks_exact(self.block_len()).enumerate() {
            model.start[i] = block[0];
            model.end[i] = block[1];
            let (trans, emit) = block[2..].split_at(self.states);
            model.transition[i * self.states..(i + 1) * self.states].copy_from_slice(trans);
            model.emission[i * self.symbols..(i + 1) * self.symbols].copy_from_slice(emit);
        }
        Ok(model)
    }
    /// Return log Pr{obs | self}. In HMM term, it is the "forward" algorithm.
    /// Returns negative infinity if the sequence can not be generated at all.
    pub fn log_likelihood(&self, obs: &[usize]) -> f64 {
        self.forward_likelihood(obs)
    }
    fn check_symbols(&self, obs: &[usize]) -> Result<()> {
        match obs.iter().find(|&&o| self.symbols <= o) {
            Some(o) => {
                let msg = format!("symbol {} is out of range (alphabet: {})", o, self.symbols);
                Err(FisherError::InvalidModel(msg))
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Display for HiddenMarkovModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.states {
            write!(f, "STATE {}\tSTART:{:.3}\tEND:{:.3}\tTRANS:", i, self.start[i], self.end[i])?;
            for j in 0..self.states {
                write!(f, "\t{:.3}", self.transition(i, j))?;
            }
            write!(f, "\tEMIT:")?;
            for k in 0..self.symbols {
                write!(f, "\t{:.3}", self.emission(i, k))?;
            }
            if i + 1 < self.states {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// log(sum(exp(xs))). An empty slice or a slice of negative infinities gives negative infinity.
pub fn logsumexp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum = xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln();
    max + sum
}

/// A hidden Markov model bound to the sequences it should explain.
#[derive(Clone, Debug)]
pub struct HmmProvider {
    model: HiddenMarkovModel,
    sequences: Arc<[Vec<usize>]>,
}

impl HmmProvider {
    /// Symbols of every sequence should be smaller than the alphabet size of the model.
    pub fn new(model: HiddenMarkovModel, sequences: Arc<[Vec<usize>]>) -> Result<Self> {
        for seq in sequences.iter() {
            model.check_symbols(seq)?;
        }
        Ok(Self { model, sequences })
    }
    pub fn model(&self) -> &HiddenMarkovModel {
        &self.model
    }
    pub fn sequences(&self) -> &[Vec<usize>] {
        &self.sequences
    }
    fn sequence(&self, seq_index: usize) -> Result<&[usize]> {
        self.sequences
            .get(seq_index)
            .map(|seq| seq.as_slice())
            .ok_or(FisherError::InvalidIndex {
                index: seq_index,
                count: self.sequences.len(),
            })
    }
}

impl DerivativeProvider for HmmProvider {
    fn sequence_count(&self) -> usize {
        self.sequences.len()
    }
    fn parameter_count(&self) -> usize {
        self.model.num_parameters()
    }
    fn log_likelihood(&self, seq_index: usize) -> Result<f64> {
        let seq = self.sequence(seq_index)?;
        Ok(self.model.log_likelihood(seq))
    }
    // A single entry needs the whole forward-backward pass anyway.
    // `Assembler` only asks for full rows, through `log_likelihood_and_derivatives`.
    fn derivative(&self, seq_index: usize, parameter_index: usize) -> Result<f64> {
        let count = self.parameter_count();
        if count <= parameter_index {
            let msg = format!("parameter {} is out of range ({})", parameter_index, count);
            return Err(FisherError::InvalidModel(msg));
        }
        let mut derivatives = vec![0f64; count];
        self.derivatives(seq_index, &mut derivatives)?;
        Ok(derivatives[parameter_index])
    }
    fn derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<()> {
        self.log_likelihood_and_derivatives(seq_index, out).map(|_| ())
    }
    fn log_likelihood_and_derivatives(&self, seq_index: usize, out: &mut [f64]) -> Result<f64> {
        let seq = self.sequence(seq_index)?;
        let count = self.parameter_count();
        if out.len() != count {
            return Err(FisherError::LengthMismatch {
                expected: count,
                found: out.len(),
            });
        }
        let posterior = self.model.posterior(seq);
        posterior.derivatives(out);
        Ok(posterior.log_likelihood())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gen_seq::Generate;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    pub(crate) fn casino() -> HiddenMarkovModel {
        let start = [0.5, 0.5];
        let end = [0.5, 0.5];
        let transition = [0.9, 0.1, 0.2, 0.8];
        let emission = [0.5, 0.5, 0.8, 0.2];
        HiddenMarkovModel::new(2, 2, &start, &end, &transition, &emission).unwrap()
    }
    // Enumerate all the paths. Exponential, only for tiny inputs.
    fn brute_force(model: &HiddenMarkovModel, obs: &[usize]) -> f64 {
        let n = model.states();
        if obs.is_empty() {
            return (0..n).map(|i| model.start(i) * model.end(i)).sum::<f64>().ln();
        }
        let total = n.pow(obs.len() as u32);
        let mut prob = 0f64;
        for code in 0..total {
            let path: Vec<_> = (0..obs.len()).map(|t| (code / n.pow(t as u32)) % n).collect();
            let mut p = model.start(path[0]) * model.emission(path[0], obs[0]);
            for t in 1..obs.len() {
                p *= model.transition(path[t - 1], path[t]) * model.emission(path[t], obs[t]);
            }
            prob += p * model.end(path[obs.len() - 1]);
        }
        prob.ln()
    }
    #[test]
    fn new_normalizes() {
        let model = HiddenMarkovModel::new(1, 2, &[2.], &[3.], &[4.], &[1., 3.]).unwrap();
        assert_eq!(model.start(0), 1.);
        assert_eq!(model.end(0), 1.);
        assert_eq!(model.transition(0, 0), 1.);
        assert_eq!(model.emission(0, 1), 0.75);
        assert_eq!(model.num_parameters(), 5);
    }
    #[test]
    fn new_rejects() {
        assert!(HiddenMarkovModel::new(0, 2, &[], &[], &[], &[]).is_err());
        assert!(HiddenMarkovModel::new(1, 2, &[1.], &[1.], &[1.], &[1.]).is_err());
        assert!(HiddenMarkovModel::new(1, 1, &[1.], &[1.], &[-1.], &[1.]).is_err());
        assert!(HiddenMarkovModel::new(1, 1, &[0.], &[1.], &[1.], &[1.]).is_err());
        assert!(HiddenMarkovModel::new(1, 1, &[f64::NAN], &[1.], &[1.], &[1.]).is_err());
    }
    #[test]
    fn likelihood_matches_enumeration() {
        let model = casino();
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(4829);
        for len in 0..7 {
            let obs = model.gen(len, &mut rng);
            let lk = model.log_likelihood(&obs);
            let answer = brute_force(&model, &obs);
            assert!((lk - answer).abs() < 1e-10, "{:?}\t{}\t{}", obs, lk, answer);
        }
    }
    #[test]
    fn parameters_roundtrip() {
        let model = casino();
        let params = model.parameters();
        assert_eq!(params.len(), model.num_parameters());
        assert_eq!(params[0..2], [0.5, 0.5]);
        assert_eq!(params[2..4], [0.9, 0.1]);
        assert_eq!(params[4..6], [0.5, 0.5]);
        let same = model.with_parameters(&params).unwrap();
        assert_eq!(same.parameters(), params);
        assert!(model.with_parameters(&params[1..]).is_err());
    }
    #[test]
    fn provider_checks() {
        let model = casino();
        let seqs: Arc<[Vec<usize>]> = vec![vec![0, 1, 2]].into();
        assert!(HmmProvider::new(model.clone(), seqs).is_err());
        let seqs: Arc<[Vec<usize>]> = vec![vec![0, 1, 1], vec![]].into();
        let provider = HmmProvider::new(model, seqs).unwrap();
        assert_eq!(provider.sequence_count(), 2);
        assert_eq!(provider.parameter_count(), 12);
        assert!(provider.log_likelihood(1).unwrap().is_finite());
        let err = provider.log_likelihood(2).unwrap_err();
        assert_eq!(err, FisherError::InvalidIndex { index: 2, count: 2 });
        assert!(provider.derivative(0, 12).is_err());
        let mut short = vec![0f64; 3];
        assert!(provider.derivatives(0, &mut short).is_err());
    }
    #[test]
    fn provider_single_pass() {
        let model = casino();
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(91);
        let seqs: Arc<[Vec<usize>]> = (0..5).map(|i| model.gen(10 * i, &mut rng)).collect();
        let provider = HmmProvider::new(model, seqs).unwrap();
        let count = provider.parameter_count();
        for i in 0..provider.sequence_count() {
            let mut joint = vec![0f64; count];
            let lk = provider.log_likelihood_and_derivatives(i, &mut joint).unwrap();
            let mut separate = vec![0f64; count];
            provider.derivatives(i, &mut separate).unwrap();
            assert_eq!(joint, separate);
            assert_eq!(provider.derivative(i, count - 1).unwrap(), joint[count - 1]);
            let forward = provider.log_likelihood(i).unwrap();
            assert!((lk - forward).abs() < 1e-12, "{}\t{}\t{}", i, lk, forward);
        }
    }
    #[test]
    fn display() {
        let model = casino();
        let shown = format!("{}", model);
        assert_eq!(shown.lines().count(), 2);
        assert!(shown.starts_with("STATE 0"));
    }
}
