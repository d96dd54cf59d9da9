//! Greedy CTC decoding of the word model's output
//!
//! The sequence model emits one score row per timestep over the vocabulary
//! plus a trailing blank class. Decoding takes the best class per timestep,
//! merges consecutive repeats and drops blanks.

use ndarray::{Array2, ArrayD, Axis, Ix2};
use serde::{Deserialize, Serialize};

use super::error::{RecognitionError, Result};

/// Characters the reference handwriting model was trained on, in class order
pub const DEFAULT_CHARSET: &str =
    " !\"#&'()*+,-./0123456789:;?ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// What a class index stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// An output character
    Char(char),
    /// The CTC "no character" class
    Blank,
}

/// Ordered output alphabet; the blank class sits one past the last character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Vocabulary {
    chars: Vec<char>,
}

impl Vocabulary {
    pub fn new(chars: impl IntoIterator<Item = char>) -> Self {
        Self {
            chars: chars.into_iter().collect(),
        }
    }

    /// Number of characters, excluding the blank
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Index of the blank class
    pub fn blank_index(&self) -> usize {
        self.chars.len()
    }

    /// Number of model output classes, blank included
    pub fn class_count(&self) -> usize {
        self.chars.len() + 1
    }

    /// Map a class index to its meaning, `None` if it is out of range
    pub fn class(&self, index: usize) -> Option<Class> {
        match self.chars.get(index) {
            Some(&c) => Some(Class::Char(c)),
            None if index == self.blank_index() => Some(Class::Blank),
            None => None,
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_CHARSET.chars())
    }
}

impl From<String> for Vocabulary {
    fn from(s: String) -> Self {
        Self::new(s.chars())
    }
}

impl From<Vocabulary> for String {
    fn from(v: Vocabulary) -> Self {
        v.chars.into_iter().collect()
    }
}

/// Dense `timesteps x classes` score matrix for one word
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilityMatrix {
    scores: Array2<f32>,
}

impl ClassProbabilityMatrix {
    pub fn new(scores: Array2<f32>) -> Self {
        Self { scores }
    }

    /// Reshape a flat row-major buffer into a `timesteps x classes` matrix
    pub fn from_flat(data: Vec<f32>, timesteps: usize, classes: usize) -> Result<Self> {
        let len = data.len();
        let scores = Array2::from_shape_vec((timesteps, classes), data).map_err(|_| {
            RecognitionError::ShapeMismatch {
                expected: format!("{} values ({timesteps}x{classes})", timesteps * classes),
                actual: format!("{len} values"),
            }
        })?;
        Ok(Self { scores })
    }

    /// Accept a model output tensor shaped `[1, T, C]` or `[T, C]`
    pub fn from_tensor(tensor: ArrayD<f32>) -> Result<Self> {
        let shape = tensor.shape().to_vec();
        let tensor = match shape.as_slice() {
            [1, _, _] => tensor.index_axis_move(Axis(0), 0),
            [_, _] => tensor,
            _ => {
                return Err(RecognitionError::ShapeMismatch {
                    expected: "[1, T, C] or [T, C]".into(),
                    actual: format!("{shape:?}"),
                })
            }
        };
        let scores = tensor
            .into_dimensionality::<Ix2>()
            .map_err(|e| RecognitionError::ShapeMismatch {
                expected: "two-dimensional scores".into(),
                actual: e.to_string(),
            })?;
        Ok(Self { scores })
    }

    pub fn timesteps(&self) -> usize {
        self.scores.nrows()
    }

    pub fn classes(&self) -> usize {
        self.scores.ncols()
    }

    pub fn scores(&self) -> &Array2<f32> {
        &self.scores
    }

    /// Best class per timestep; ties go to the lowest index
    pub fn argmax(&self) -> Vec<usize> {
        self.scores
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (idx, &score) in row.iter().enumerate().skip(1) {
                    if score > row[best] {
                        best = idx;
                    }
                }
                best
            })
            .collect()
    }
}

/// Collapse a per-timestep class sequence into text
///
/// A run is a maximal stretch of equal consecutive classes. Each run emits
/// its character once; blank runs emit nothing, which lets a blank separate
/// two genuine repeats such as the `ll` in "hello".
pub fn collapse(indices: &[usize], vocabulary: &Vocabulary) -> Result<String> {
    let mut text = String::new();
    let mut previous: Option<usize> = None;

    for &index in indices {
        if previous != Some(index) {
            match vocabulary.class(index) {
                Some(Class::Char(c)) => text.push(c),
                Some(Class::Blank) => {}
                None => {
                    return Err(RecognitionError::UnknownClass {
                        index,
                        classes: vocabulary.class_count(),
                    })
                }
            }
        }
        previous = Some(index);
    }

    Ok(text)
}

/// Greedy CTC decoder bound to one vocabulary
#[derive(Debug, Clone, Default)]
pub struct SequenceDecoder {
    vocabulary: Vocabulary,
    /// Required number of timesteps, if the model contract fixes one
    timesteps: Option<usize>,
}

impl SequenceDecoder {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            timesteps: None,
        }
    }

    /// Also require an exact timestep count
    pub fn with_timesteps(mut self, timesteps: usize) -> Self {
        self.timesteps = Some(timesteps);
        self
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Decode one word's score matrix into text
    pub fn decode(&self, matrix: &ClassProbabilityMatrix) -> Result<String> {
        let classes = self.vocabulary.class_count();
        let timesteps_ok = self.timesteps.map_or(true, |t| t == matrix.timesteps());
        if matrix.classes() != classes || !timesteps_ok {
            return Err(RecognitionError::ShapeMismatch {
                expected: match self.timesteps {
                    Some(t) => format!("{t}x{classes}"),
                    None => format!("Tx{classes}"),
                },
                actual: format!("{}x{}", matrix.timesteps(), matrix.classes()),
            });
        }

        collapse(&matrix.argmax(), &self.vocabulary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One-hot rows for the given class sequence
    fn one_hot(indices: &[usize], classes: usize) -> ClassProbabilityMatrix {
        let mut scores = Array2::<f32>::zeros((indices.len(), classes));
        for (t, &c) in indices.iter().enumerate() {
            scores[[t, c]] = 1.0;
        }
        ClassProbabilityMatrix::new(scores)
    }

    #[test]
    fn test_default_vocabulary_layout() {
        let vocab = Vocabulary::default();
        assert_eq!(vocab.len(), 79);
        assert_eq!(vocab.blank_index(), 79);
        assert_eq!(vocab.class_count(), 80);
        assert_eq!(vocab.class(0), Some(Class::Char(' ')));
        assert_eq!(vocab.class(14), Some(Class::Char('0')));
        assert_eq!(vocab.class(27), Some(Class::Char('A')));
        assert_eq!(vocab.class(78), Some(Class::Char('z')));
        assert_eq!(vocab.class(79), Some(Class::Blank));
        assert_eq!(vocab.class(80), None);
    }

    #[test]
    fn test_collapse_merges_runs_and_drops_blanks() {
        let vocab = Vocabulary::new(('!'..='p').take(80));
        assert_eq!(vocab.blank_index(), 80);

        let text = collapse(&[5, 5, 5, 80, 7, 7, 80, 80, 9], &vocab).unwrap();
        let expected: String = [5, 7, 9]
            .iter()
            .map(|&i| match vocab.class(i) {
                Some(Class::Char(c)) => c,
                other => panic!("unexpected class {other:?}"),
            })
            .collect();
        assert_eq!(text, expected);
    }

    #[test]
    fn test_blank_separates_real_repeats() {
        let vocab = Vocabulary::new("helo".chars());
        let blank = vocab.blank_index();
        let seq = [0, 1, 1, 2, blank, 2, 3, 3, blank];
        assert_eq!(collapse(&seq, &vocab).unwrap(), "hello");

        // Without the blank the two l's merge
        let seq = [0, 1, 2, 2, 3];
        assert_eq!(collapse(&seq, &vocab).unwrap(), "helo");
    }

    #[test]
    fn test_alternating_runs_each_emit() {
        let vocab = Vocabulary::new("ab".chars());
        assert_eq!(collapse(&[0, 1, 0, 1, 1, 0], &vocab).unwrap(), "ababa");
    }

    #[test]
    fn test_all_blank_decodes_to_empty() {
        let vocab = Vocabulary::default();
        let blank = vocab.blank_index();
        assert_eq!(collapse(&[blank; 64], &vocab).unwrap(), "");
        assert_eq!(collapse(&[], &vocab).unwrap(), "");
    }

    #[test]
    fn test_collapse_rejects_out_of_range_class() {
        let vocab = Vocabulary::new("ab".chars());
        let err = collapse(&[0, 7], &vocab).unwrap_err();
        assert!(matches!(err, RecognitionError::UnknownClass { index: 7, classes: 3 }));
    }

    #[test]
    fn test_argmax_ties_pick_lowest_index() {
        let scores = ndarray::arr2(&[[0.2, 0.5, 0.5], [0.9, 0.1, 0.9], [0.0, 0.0, 0.0]]);
        let matrix = ClassProbabilityMatrix::new(scores);
        assert_eq!(matrix.argmax(), vec![1, 0, 0]);
    }

    #[test]
    fn test_decode_full_matrix() {
        let vocab = Vocabulary::default();
        let blank = vocab.blank_index();
        // "Hi" -> H = 34, i = 61
        let mut seq = vec![blank, 34, 34, blank, 61, 61];
        seq.resize(64, blank);
        let decoder = SequenceDecoder::new(vocab).with_timesteps(64);
        assert_eq!(decoder.decode(&one_hot(&seq, 80)).unwrap(), "Hi");
    }

    #[test]
    fn test_decode_rejects_wrong_class_count() {
        let decoder = SequenceDecoder::new(Vocabulary::default());
        let err = decoder.decode(&one_hot(&[0, 1], 81)).unwrap_err();
        assert!(matches!(err, RecognitionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_timesteps() {
        let decoder = SequenceDecoder::new(Vocabulary::default()).with_timesteps(64);
        let err = decoder.decode(&one_hot(&[0; 32], 80)).unwrap_err();
        assert!(matches!(err, RecognitionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_flat_checks_length() {
        assert!(ClassProbabilityMatrix::from_flat(vec![0.0; 64 * 80], 64, 80).is_ok());
        let err = ClassProbabilityMatrix::from_flat(vec![0.0; 64 * 80 - 1], 64, 80).unwrap_err();
        assert!(matches!(err, RecognitionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_flat_is_row_major() {
        let matrix =
            ClassProbabilityMatrix::from_flat(vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0], 2, 3).unwrap();
        assert_eq!(matrix.argmax(), vec![1, 0]);
    }

    #[test]
    fn test_from_tensor_accepts_batched_and_plain() {
        let batched = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 64, 80]));
        let m = ClassProbabilityMatrix::from_tensor(batched).unwrap();
        assert_eq!((m.timesteps(), m.classes()), (64, 80));

        let plain = ArrayD::<f32>::zeros(ndarray::IxDyn(&[64, 80]));
        assert!(ClassProbabilityMatrix::from_tensor(plain).is_ok());

        let wrong = ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 64, 80]));
        assert!(ClassProbabilityMatrix::from_tensor(wrong).is_err());
    }

    #[test]
    fn test_decoded_length_never_exceeds_timesteps() {
        let vocab = Vocabulary::default();
        let decoder = SequenceDecoder::new(vocab.clone());
        let mut state: u32 = 0x2545_f491;

        for timesteps in [1usize, 7, 64] {
            for _ in 0..20 {
                let flat: Vec<f32> = (0..timesteps * vocab.class_count())
                    .map(|_| {
                        // xorshift32
                        state ^= state << 13;
                        state ^= state >> 17;
                        state ^= state << 5;
                        (state % 1000) as f32 / 1000.0
                    })
                    .collect();
                let classes = vocab.class_count();
                let matrix = ClassProbabilityMatrix::from_flat(flat, timesteps, classes).unwrap();
                let text = decoder.decode(&matrix).unwrap();
                assert!(text.chars().count() <= timesteps);
            }
        }
    }

    #[test]
    fn test_vocabulary_serde_as_string() {
        let vocab = Vocabulary::new("abc".chars());
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
    }
}
