//! This module is to generate some random sequence to assess the performance.
//! Usually, it would not be used in the real-applications.
use crate::hmm::HiddenMarkovModel;
use rand::Rng;

/// Something that can emit a sequence of symbols.
pub trait Generate {
    fn gen<R: Rng>(&self, len: usize, rng: &mut R) -> Vec<usize>;
}

// Pick an index with probability proportional to `weights`.
fn choose<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    let mut dart = rng.gen_range(0f64..1f64) * total;
    for (i, w) in weights.iter().enumerate() {
        if dart < *w {
            return i;
        }
        dart -= w;
    }
    weights.iter().rposition(|&w| 0f64 < w).unwrap_or(0)
}

impl Generate for HiddenMarkovModel {
    /// Emit exactly `len` symbols. The end distribution is not used;
    /// the length is decided by the caller.
    fn gen<R: Rng>(&self, len: usize, rng: &mut R) -> Vec<usize> {
        let (n, m) = (self.states(), self.symbols());
        let start: Vec<_> = (0..n).map(|i| self.start(i)).collect();
        let trans: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| self.transition(i, j)).collect())
            .collect();
        let emit: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..m).map(|k| self.emission(i, k)).collect())
            .collect();
        let mut state = choose(&start, rng);
        let mut seq = Vec::with_capacity(len);
        for t in 0..len {
            if 0 < t {
                state = choose(&trans[state], rng);
            }
            seq.push(choose(&emit[state], rng));
        }
        seq
    }
}

/// Generate `num` sequences of length `len`.
pub fn generate_set<G: Generate, R: Rng>(model: &G, num: usize, len: usize, rng: &mut R) -> Vec<Vec<usize>> {
    (0..num).map(|_| model.gen(len, rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    #[test]
    fn gen_respects_zeros() {
        let start = [0.0, 1.0];
        let end = [1.0, 1.0];
        let transition = [1.0, 0.0, 0.0, 1.0];
        let emission = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let model = HiddenMarkovModel::new(2, 3, &start, &end, &transition, &emission).unwrap();
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(24);
        let seqs = generate_set(&model, 10, 20, &mut rng);
        assert_eq!(seqs.len(), 10);
        assert!(seqs.iter().all(|seq| seq.len() == 20));
        assert!(seqs.iter().flatten().all(|&x| x == 2));
    }
    #[test]
    fn choose_distribution() {
        let mut rng: Xoshiro256StarStar = SeedableRng::seed_from_u64(4);
        let weights = [0.2, 0.0, 0.8];
        let mut counts = [0; 3];
        for _ in 0..10_000 {
            counts[choose(&weights, &mut rng)] += 1;
        }
        assert_eq!(counts[1], 0);
        assert!((1_700..2_300).contains(&counts[0]), "{:?}", counts);
    }
}
