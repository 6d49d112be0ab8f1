//! Candidate model list resolution.

use crate::error::{Error, Result};

/// Ordered, non-empty list of models to try; list order is preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateList(Vec<String>);

impl CandidateList {
    /// Build a candidate list, dropping repeated models but keeping first-seen order.
    pub fn new(models: Vec<String>) -> Result<Self> {
        let mut unique: Vec<String> = Vec::with_capacity(models.len());
        for model in models {
            let model = model.trim().to_string();
            if model.is_empty() {
                return Err(Error::Validation(
                    "candidate model names must be non-empty".to_string(),
                ));
            }
            if !unique.contains(&model) {
                unique.push(model);
            }
        }

        if unique.is_empty() {
            return Err(Error::Validation(
                "at least one candidate model is required".to_string(),
            ));
        }

        Ok(Self(unique))
    }

    /// Caller-supplied models win; otherwise fall back to the configured default.
    pub fn resolve(requested: Option<Vec<String>>, default: &[String]) -> Result<Self> {
        match requested {
            Some(models) => Self::new(models),
            None => Self::new(default.to_vec()),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
