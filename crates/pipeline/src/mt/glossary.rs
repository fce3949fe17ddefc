//! Glossary substitution
//!
//! Domain terminology applied to source text before translation: whole-word,
//! case-insensitive replacement per (source, target) language pair. The set
//! of applied substitutions travels with the translation result.

use regex::RegexBuilder;
use std::collections::HashMap;

use lingo_core::Language;

/// Per-language-pair terminology maps
#[derive(Debug, Default)]
pub struct Glossary {
    terms: HashMap<(Language, Language), Vec<(String, String)>>,
}

impl Glossary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Glossary seeded with the stock technical and medical terminology
    pub fn with_defaults() -> Self {
        let mut glossary = Self::new();

        for (term, replacement) in [
            ("API", "API"),
            ("database", "base de datos"),
            ("server", "servidor"),
            ("client", "cliente"),
            ("authentication", "autenticación"),
            ("microservice", "microservicio"),
        ] {
            glossary.add_term(Language::English, Language::Spanish, term, replacement);
        }

        for (term, replacement) in [
            ("diagnosis", "diagnostic"),
            ("treatment", "traitement"),
            ("patient", "patient"),
            ("symptoms", "symptômes"),
            ("prescription", "prescription"),
        ] {
            glossary.add_term(Language::English, Language::French, term, replacement);
        }

        glossary
    }

    pub fn add_term(
        &mut self,
        source: Language,
        target: Language,
        term: impl Into<String>,
        replacement: impl Into<String>,
    ) {
        self.terms
            .entry((source, target))
            .or_default()
            .push((term.into(), replacement.into()));
    }

    /// Apply the pair's terms to `text`. Returns the substituted text and
    /// the map of terms that actually matched.
    pub fn apply(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> (String, HashMap<String, String>) {
        let Some(terms) = self.terms.get(&(source, target)) else {
            return (text.to_string(), HashMap::new());
        };

        let mut output = text.to_string();
        let mut applied = HashMap::new();

        for (term, replacement) in terms {
            let pattern = format!(r"\b{}\b", regex::escape(term));
            let re = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(term = %term, error = %e, "Skipping unbuildable glossary term");
                    continue;
                },
            };

            if re.is_match(&output) {
                output = re.replace_all(&output, replacement.as_str()).into_owned();
                applied.insert(term.clone(), replacement.clone());
            }
        }

        (output, applied)
    }

    pub fn term_count(&self, source: Language, target: Language) -> usize {
        self.terms.get(&(source, target)).map_or(0, |t| t.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_word_case_insensitive() {
        let glossary = Glossary::with_defaults();
        let (text, applied) = glossary.apply(
            "The Server and the database",
            Language::English,
            Language::Spanish,
        );
        assert_eq!(text, "The servidor and the base de datos");
        assert_eq!(applied.len(), 2);
        assert_eq!(applied["server"], "servidor");
    }

    #[test]
    fn test_partial_words_not_replaced() {
        let mut glossary = Glossary::new();
        glossary.add_term(Language::English, Language::Spanish, "client", "cliente");
        let (text, applied) =
            glossary.apply("clients are here", Language::English, Language::Spanish);
        // "clients" is not the whole word "client"
        assert_eq!(text, "clients are here");
        assert!(applied.is_empty());
    }

    #[test]
    fn test_unknown_pair_passthrough() {
        let glossary = Glossary::with_defaults();
        let (text, applied) =
            glossary.apply("database", Language::English, Language::German);
        assert_eq!(text, "database");
        assert!(applied.is_empty());
    }
}
