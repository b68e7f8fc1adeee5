//! Gender classification from product tags
//!
//! An ordered rule table: rules are tried in order, each against every tag,
//! and the first rule with a matching term wins. Tags and terms are compared
//! trimmed and lowercased, either as substring (`contains`) or whole tag
//! (`exact`).

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(alias = "men")]
    Men,
    #[serde(alias = "women")]
    Women,
    #[serde(alias = "kids")]
    Kids,
    #[serde(alias = "unisex")]
    Unisex,
    #[serde(alias = "unknown")]
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Men => "Men",
            Self::Women => "Women",
            Self::Kids => "Kids",
            Self::Unisex => "Unisex",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Tag contains the term (`"womens-shoes"` matches `women`)
    #[default]
    Contains,
    /// Tag equals the term
    Exact,
    /// Term appears in the tag as whole words (`"mens-shoes"` matches `mens`,
    /// `"garment"` does not match `men`)
    Word,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains => f.write_str("contains"),
            Self::Exact => f.write_str("exact"),
            Self::Word => f.write_str("word"),
        }
    }
}

/// One row of the table: any of `terms` classifies as `gender`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderRule {
    pub gender: Gender,
    pub terms: Vec<String>,
}

impl GenderRule {
    pub fn new(gender: Gender, terms: &[&str]) -> Self {
        Self {
            gender,
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Ordered rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenderRules {
    mode: MatchMode,
    rules: Vec<GenderRule>,
}

impl Default for GenderRules {
    fn default() -> Self {
        Self::new(MatchMode::Contains, default_rules())
    }
}

/// Default table. Women must precede Men: `women` contains `men`.
pub fn default_rules() -> Vec<GenderRule> {
    vec![
        GenderRule::new(Gender::Kids, &["kids", "kid", "children", "baby", "toddler"]),
        GenderRule::new(
            Gender::Women,
            &["women", "woman", "womens", "female", "girls", "ladies"],
        ),
        GenderRule::new(Gender::Men, &["men", "man", "mens", "male", "boys"]),
        GenderRule::new(Gender::Unisex, &["unisex"]),
    ]
}

impl GenderRules {
    /// Build a table; terms are normalized and blank terms dropped.
    pub fn new(mode: MatchMode, rules: Vec<GenderRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| GenderRule {
                gender: rule.gender,
                terms: rule
                    .terms
                    .iter()
                    .map(|t| normalize(t))
                    .filter(|t| !t.is_empty())
                    .collect(),
            })
            .collect();
        Self { mode, rules }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn rules(&self) -> &[GenderRule] {
        &self.rules
    }

    /// Classify a product by its tags. No tags or no match ⇒ `Unknown`.
    pub fn classify<S: AsRef<str>>(&self, tags: &[S]) -> Gender {
        let tags: Vec<String> = tags.iter().map(|t| normalize(t.as_ref())).collect();
        for rule in &self.rules {
            let hit = tags.iter().any(|tag| {
                rule.terms.iter().any(|term| match self.mode {
                    MatchMode::Contains => tag.contains(term.as_str()),
                    MatchMode::Exact => tag == term,
                    MatchMode::Word => contains_word(tag, term),
                })
            });
            if hit {
                return rule.gender;
            }
        }
        Gender::Unknown
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// `term` occurs in `tag` with no alphanumeric character on either side.
fn contains_word(tag: &str, term: &str) -> bool {
    tag.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before = tag[..start].chars().next_back();
        let after = tag[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
