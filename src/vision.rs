//! Zero-shot image classification.
//!
//! The image and every candidate label are embedded into a shared space by an
//! [`ImageEncoder`]. Scaled cosine similarities are turned into probabilities
//! with a softmax; the top label is reported only when it clears the
//! confidence threshold.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, error};

use crate::embedding::{cosine_similarity, normalize};
use crate::traits::ImageEncoder;

/// Minimum probability, in percent, for a label to be reported.
pub const DEFAULT_THRESHOLD: f32 = 90.0;

const LOGIT_SCALE: f32 = 100.0;

const STOPWORDS: [&str; 11] = [
    "is", "it", "this", "that", "or", "are", "these", "those", "a", "an", "the",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Winning label; empty when no label is confident enough.
    pub label: String,
    /// Probability of the best label, in percent.
    pub probability: f32,
    /// Every label with its probability, best first.
    pub breakdown: Vec<(String, f32)>,
    /// `label: xx.xx% ` for every label, best first.
    pub verbose: String,
}

pub struct ImageClassifier {
    encoder: Arc<dyn ImageEncoder>,
    threshold: f32,
}

impl ImageClassifier {
    pub fn new(encoder: Arc<dyn ImageEncoder>) -> Self {
        Self {
            encoder,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Pick the label that best describes `image`.
    ///
    /// An empty label list is a caller error. Encoder failures are logged and
    /// produce an empty classification.
    pub fn classify(&self, image: &[u8], labels: &[String]) -> Result<Classification> {
        if labels.is_empty() {
            bail!("No labels to classify against");
        }
        match self.score(image, labels) {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(error = %e, "image classification failed");
                Ok(Classification::default())
            }
        }
    }

    fn score(&self, image: &[u8], labels: &[String]) -> Result<Classification> {
        let image_vec = normalize(&self.encoder.encode_image(image)?);
        let label_vecs = self.encoder.encode_labels(labels)?;
        if label_vecs.len() != labels.len() {
            bail!(
                "Encoder returned {} label vectors for {} labels",
                label_vecs.len(),
                labels.len()
            );
        }

        let logits: Vec<f32> = label_vecs
            .into_iter()
            .map(|v| LOGIT_SCALE * cosine_similarity(&image_vec, &normalize(&v)))
            .collect();
        let probabilities = softmax(&logits);

        let mut breakdown: Vec<(String, f32)> = labels
            .iter()
            .cloned()
            .zip(probabilities.into_iter().map(|p| p * 100.0))
            .collect();
        breakdown.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let verbose: String = breakdown
            .iter()
            .map(|(label, p)| format!("{}: {:.2}% ", label, p))
            .collect();
        let (best, probability) = breakdown
            .first()
            .map(|(l, p)| (l.clone(), *p))
            .unwrap_or_default();
        let label = if probability > self.threshold {
            best
        } else {
            String::new()
        };

        debug!(label = %label, probability, "image classified");
        Ok(Classification {
            label,
            probability,
            breakdown,
            verbose,
        })
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Candidate labels from free text such as `"a cat or a dog"`: words in
/// first-seen order, duplicates and filler words removed.
pub fn labels_from_description(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Maps the image to a fixed vector and each label to a one-hot axis.
    struct AxisEncoder {
        image: Vec<f32>,
    }

    impl ImageEncoder for AxisEncoder {
        fn encode_image(&self, _image: &[u8]) -> Result<Vec<f32>> {
            Ok(self.image.clone())
        }

        fn encode_labels(&self, labels: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok((0..labels.len())
                .map(|i| {
                    let mut v = vec![0.0; self.image.len()];
                    v[i] = 1.0;
                    v
                })
                .collect())
        }
    }

    struct FailingEncoder;

    impl ImageEncoder for FailingEncoder {
        fn encode_image(&self, _image: &[u8]) -> Result<Vec<f32>> {
            bail!("model not loaded")
        }

        fn encode_labels(&self, _labels: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("model not loaded")
        }
    }

    fn labels(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_confident_label_reported() {
        let classifier = ImageClassifier::new(Arc::new(AxisEncoder {
            image: vec![0.0, 1.0, 0.0],
        }));
        let result = classifier.classify(b"png", &labels(&["cat", "dog", "bird"])).unwrap();
        assert_eq!(result.label, "dog");
        assert!(result.probability > 99.0);
        assert_eq!(result.breakdown[0].0, "dog");
        assert!(result.verbose.starts_with("dog: "));
        assert!(result.verbose.ends_with("% "));
    }

    #[test]
    fn test_ambiguous_label_suppressed() {
        let classifier = ImageClassifier::new(Arc::new(AxisEncoder {
            image: vec![1.0, 1.0],
        }));
        let result = classifier.classify(b"png", &labels(&["cat", "dog"])).unwrap();
        assert_eq!(result.label, "");
        assert!((result.probability - 50.0).abs() < 0.1);
        assert_eq!(result.breakdown.len(), 2);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let classifier = ImageClassifier::new(Arc::new(AxisEncoder {
            image: vec![1.0, 1.0],
        }))
        .with_threshold(40.0);
        let result = classifier.classify(b"png", &labels(&["cat", "dog"])).unwrap();
        assert!(!result.label.is_empty());
    }

    #[test]
    fn test_probability_at_threshold_not_reported() {
        let classifier = ImageClassifier::new(Arc::new(AxisEncoder {
            image: vec![1.0, 1.0],
        }))
        .with_threshold(50.0);
        let result = classifier.classify(b"png", &labels(&["cat", "dog"])).unwrap();
        assert_eq!(result.probability, 50.0);
        assert_eq!(result.label, "");
    }

    #[test]
    fn test_encoder_failure_is_empty() {
        let classifier = ImageClassifier::new(Arc::new(FailingEncoder));
        let result = classifier.classify(b"png", &labels(&["cat"])).unwrap();
        assert_eq!(result, Classification::default());
    }

    #[test]
    fn test_no_labels_is_error() {
        let classifier = ImageClassifier::new(Arc::new(FailingEncoder));
        assert!(classifier.classify(b"png", &[]).is_err());
    }

    #[test]
    fn test_labels_from_description() {
        assert_eq!(
            labels_from_description("Is this a cat, or a dog? The cat!"),
            vec!["cat", "dog"]
        );
        assert!(labels_from_description("  ...  ").is_empty());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }
}
