use std::collections::BTreeSet;
use std::path::Path;
use anyhow::Context;
use log::info;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use crate::error::PipelineError;

/// Where a keyword must touch a word boundary to count as a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordBoundary {
    /// Boundary before or after the keyword (either side suffices)
    Either,
    /// Boundary before the keyword
    Prefix,
    /// Boundary after the keyword
    Suffix,
    /// Boundary on both sides
    Both,
    /// Plain substring match
    None,
}

/// All keywords compiled into one case-insensitive pattern
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    pattern: Regex,
    keyword_count: usize,
}

impl KeywordMatcher {
    /// Compile a keyword set. Duplicates collapse; an empty set is a configuration error.
    pub fn new<I, S>(keywords: I, boundary: KeywordBoundary) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: BTreeSet<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        if keywords.is_empty() {
            return Err(PipelineError::Configuration("no keywords loaded".into()));
        }

        // Longest first so a keyword never loses to one of its own prefixes
        let mut ordered: Vec<&String> = keywords.iter().collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = ordered
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");

        let source = match boundary {
            KeywordBoundary::Either => format!(r"\b(?P<kw>{alt})|(?P<kw2>{alt})\b", alt = alternation),
            KeywordBoundary::Prefix => format!(r"\b(?P<kw>{})", alternation),
            KeywordBoundary::Suffix => format!(r"(?P<kw>{})\b", alternation),
            KeywordBoundary::Both => format!(r"\b(?P<kw>{})\b", alternation),
            KeywordBoundary::None => format!(r"(?P<kw>{})", alternation),
        };

        let pattern = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("invalid keyword pattern: {}", e)))?;

        info!("Matching pattern: {}", pattern.as_str());

        Ok(Self { pattern, keyword_count: keywords.len() })
    }

    /// Load keywords from a UTF-8 file: one per line, blank lines and `#` lines ignored
    pub fn from_file(path: &Path, boundary: KeywordBoundary) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keyword file: {}", path.display()))
            .map_err(|e| PipelineError::Configuration(format!("{:#}", e)))?;
        Self::new(parse_keywords(&content), boundary)
    }

    /// Return the matched text when the haystack contains a keyword
    pub fn find(&self, haystack: &str) -> Option<String> {
        let caps = self.pattern.captures(haystack)?;
        caps.name("kw")
            .or_else(|| caps.name("kw2"))
            .map(|m| m.as_str().to_string())
    }

    pub fn keyword_count(&self) -> usize {
        self.keyword_count
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Split a keyword list into its entries
pub fn parse_keywords(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
