//! Error types shared across the dataplane

use std::time::Duration;
use thiserror::Error;

use crate::Language;

/// Errors surfaced by backends and core helpers
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Recognizer error: {0}")]
    Recognizer(String),

    #[error("Translator error: {0}")]
    Translator(String),

    #[error("Synthesizer error: {0}")]
    Synthesizer(String),

    #[error("Unsupported language pair: {src_lang}->{target}")]
    UnsupportedPair { src_lang: Language, target: Language },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
