//! Router module for candidate model selection.
//!
//! This module handles choosing which upstream model serves a request:
//! - Resolving the ordered candidate list
//! - Walking it with retryable/fatal failure classification

pub mod candidates;
pub mod fallback;

pub use candidates::CandidateList;
pub use fallback::{
    classify_status, classify_transport, format_fallbacks_header, run_fallback, AttemptRecord,
    FallbackOutcome, FallbackPolicy, FallbackState, Selected,
};
