// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Stratified k-fold partitioning of channels
//!
//! Samples of each class are spread over the folds so that every fold keeps
//! roughly the overall class ratio. Each sample lands in exactly one test set.

use crate::error::EvalError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One train/test partition, as indices into the labels passed to `split`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    /// Shuffle the fold assignment within each class
    pub shuffle: bool,
    pub seed: u64,
}

impl StratifiedKFold {
    /// Deterministic, unshuffled splitter
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: 0,
        }
    }

    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.seed = seed;
        self
    }

    /// Partition `labels` into `n_splits` folds
    pub fn split<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<Fold>, EvalError> {
        let n_samples = labels.len();
        let k = self.n_splits;

        if k < 2 || k > n_samples {
            return Err(EvalError::InvalidFoldCount {
                folds: k,
                samples: n_samples,
            });
        }

        // Classes are numbered in order of first appearance
        let mut class_index: HashMap<&str, usize> = HashMap::new();
        let encoded: Vec<usize> = labels
            .iter()
            .map(|label| {
                let next = class_index.len();
                *class_index.entry(label.as_ref()).or_insert(next)
            })
            .collect();
        let n_classes = class_index.len();

        let mut class_counts = vec![0usize; n_classes];
        for &c in &encoded {
            class_counts[c] += 1;
        }
        if let Some(&smallest) = class_counts.iter().min() {
            if smallest < k {
                tracing::warn!(
                    "The least populated class has only {} members, fewer than n_splits={}",
                    smallest,
                    k
                );
            }
        }

        // Deal the label-sorted samples round-robin to decide how many of each
        // class every fold receives
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        let mut allocation = vec![vec![0usize; n_classes]; k];
        for (position, &c) in sorted.iter().enumerate() {
            allocation[position % k][c] += 1;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut test_fold = vec![0usize; n_samples];

        for class in 0..n_classes {
            let mut folds_for_class: Vec<usize> = (0..k)
                .flat_map(|fold| std::iter::repeat(fold).take(allocation[fold][class]))
                .collect();
            if self.shuffle {
                folds_for_class.shuffle(&mut rng);
            }

            let members = encoded.iter().enumerate().filter(|&(_, &c)| c == class).map(|(i, _)| i);
            for (sample, fold) in members.zip(folds_for_class) {
                test_fold[sample] = fold;
            }
        }

        let folds = (0..k)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) = (0..n_samples).partition(|&i| test_fold[i] == fold);
                Fold { index: fold, train, test }
            })
            .collect();

        Ok(folds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn labels(counts: &[(&str, usize)]) -> Vec<String> {
        counts
            .iter()
            .flat_map(|(label, count)| std::iter::repeat(label.to_string()).take(*count))
            .collect()
    }

    fn assert_partition(folds: &[Fold], n_samples: usize) {
        let mut seen = HashSet::new();
        for fold in folds {
            for &i in &fold.test {
                assert!(seen.insert(i), "sample {} appears in two test sets", i);
            }
            let train: HashSet<_> = fold.train.iter().copied().collect();
            assert!(fold.test.iter().all(|i| !train.contains(i)));
            assert_eq!(fold.train.len() + fold.test.len(), n_samples);
        }
        assert_eq!(seen.len(), n_samples);
    }

    #[test]
    fn test_test_sets_partition_samples() {
        let y = labels(&[("left", 7), ("center", 5), ("right", 9)]);
        for k in 2..=5 {
            let folds = StratifiedKFold::new(k).split(&y).unwrap();
            assert_eq!(folds.len(), k);
            assert_partition(&folds, y.len());
        }
    }

    #[test]
    fn test_folds_are_stratified() {
        let y = labels(&[("left", 10), ("right", 5)]);
        let folds = StratifiedKFold::new(5).split(&y).unwrap();

        for fold in &folds {
            let left = fold.test.iter().filter(|&&i| y[i] == "left").count();
            let right = fold.test.iter().filter(|&&i| y[i] == "right").count();
            assert_eq!(left, 2);
            assert_eq!(right, 1);
        }
    }

    #[test]
    fn test_unshuffled_split_is_deterministic() {
        let y = vec!["left", "right"];
        let folds = StratifiedKFold::new(2).split(&y).unwrap();

        assert_eq!(folds[0].test, vec![0]);
        assert_eq!(folds[0].train, vec![1]);
        assert_eq!(folds[1].test, vec![1]);
        assert_eq!(folds[1].train, vec![0]);
    }

    #[test]
    fn test_classes_numbered_by_first_appearance() {
        // "c" appears first, so it is dealt before "a" despite sorting after it
        let y = vec!["c", "c", "c", "a"];
        let folds = StratifiedKFold::new(2).split(&y).unwrap();

        assert_eq!(folds[0].test, vec![0, 1]);
        assert_eq!(folds[1].test, vec![2, 3]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let y = labels(&[("left", 12), ("right", 12)]);
        let a = StratifiedKFold::new(4).with_shuffle(7).split(&y).unwrap();
        let b = StratifiedKFold::new(4).with_shuffle(7).split(&y).unwrap();

        assert_eq!(a, b);
        assert_partition(&a, y.len());
    }

    #[test]
    fn test_invalid_fold_counts() {
        let y = vec!["left", "right", "left"];
        assert!(matches!(
            StratifiedKFold::new(1).split(&y),
            Err(EvalError::InvalidFoldCount { folds: 1, samples: 3 })
        ));
        assert!(matches!(
            StratifiedKFold::new(4).split(&y),
            Err(EvalError::InvalidFoldCount { folds: 4, samples: 3 })
        ));
    }
}
