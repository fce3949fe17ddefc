//! Language definitions for the translation pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Languages the pipeline can be configured for.
///
/// The set mirrors the language pairs the stock translation models ship
/// with; backends advertise the subset they actually support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    #[default]
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Hindi,
    Japanese,
    Mandarin,
}

impl Language {
    /// ISO 639-1 code
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Portuguese => "pt",
            Language::Hindi => "hi",
            Language::Japanese => "ja",
            Language::Mandarin => "zh",
        }
    }

    /// Parse an ISO 639-1 code (case-insensitive)
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_lowercase().as_str() {
            "en" => Some(Language::English),
            "es" => Some(Language::Spanish),
            "fr" => Some(Language::French),
            "de" => Some(Language::German),
            "it" => Some(Language::Italian),
            "pt" => Some(Language::Portuguese),
            "hi" => Some(Language::Hindi),
            "ja" => Some(Language::Japanese),
            "zh" => Some(Language::Mandarin),
            _ => None,
        }
    }

    /// All known languages
    pub fn all() -> &'static [Language] {
        &[
            Language::English,
            Language::Spanish,
            Language::French,
            Language::German,
            Language::Italian,
            Language::Portuguese,
            Language::Hindi,
            Language::Japanese,
            Language::Mandarin,
        ]
    }

    /// Expected character inventory for translation-output coverage scoring.
    ///
    /// Languages without a curated set fall back to the English inventory,
    /// matching the original quality heuristics.
    pub fn expected_charset(&self) -> &'static str {
        const COMMON: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 .,!?'-\"()[]{}:;";
        match self {
            Language::English => COMMON,
            Language::Spanish => {
                "abcdefghijklmnopqrstuvwxyzáéíóúüñABCDEFGHIJKLMNOPQRSTUVWXYZÁÉÍÓÚÜÑ0123456789 .,!?'-\"()[]{}:;¿¡"
            },
            Language::French => {
                "abcdefghijklmnopqrstuvwxyzàâäéèêëïîôöùûüÿçABCDEFGHIJKLMNOPQRSTUVWXYZÀÂÄÉÈÊËÏÎÔÖÙÛÜŸÇ0123456789 .,!?'-\"()[]{}:;"
            },
            Language::German => {
                "abcdefghijklmnopqrstuvwxyzäöüßABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÜ0123456789 .,!?'-\"()[]{}:;"
            },
            Language::Italian => {
                "abcdefghijklmnopqrstuvwxyzàèéìíîòóùúABCDEFGHIJKLMNOPQRSTUVWXYZÀÈÉÌÍÎÒÓÙÚ0123456789 .,!?'-\"()[]{}:;"
            },
            _ => COMMON,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<String> for Language {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Language::from_code(&value).ok_or_else(|| format!("unknown language code: {value}"))
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.code().to_string()
    }
}
