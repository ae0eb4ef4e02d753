//! Standard-reference detection: explicit numeric references plus keyword clusters

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

use super::taxonomy::Taxonomy;
use crate::error::{Error, Result};

/// Hard ceiling for any pattern-derived score
pub const MAX_SCORE: f32 = 0.95;

const STANDARD_WITH_SPEC_WEIGHT: f32 = 0.95;
const STANDARD_WEIGHT: f32 = 0.9;
const CRITERION_WEIGHT: f32 = 0.85;
const BARE_NUMBER_WEIGHT: f32 = 0.8;
const STANDARD_KEYWORD_WEIGHT: f32 = 0.3;
const SPEC_KEYWORD_WEIGHT: f32 = 0.2;

/// "Standard 3" or "Standard 3.b"
static STANDARD_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bstandard\s+(\d+)(?:\.([a-z0-9]+))?\b").expect("Invalid regex")
});

/// "Criterion 3.2" / "Element 3.b"
static CRITERION_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:criterion|element)\s+(\d+)\.([a-z0-9]+)\b").expect("Invalid regex")
});

/// "3.b" at the start of a line
static BARE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(\d+)\.([a-z0-9]+)\b").expect("Invalid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RefKind {
    StandardWithSpec,
    Standard,
    Criterion,
    Bare,
}

impl RefKind {
    fn weight(&self) -> f32 {
        match self {
            Self::StandardWithSpec => STANDARD_WITH_SPEC_WEIGHT,
            Self::Standard => STANDARD_WEIGHT,
            Self::Criterion => CRITERION_WEIGHT,
            Self::Bare => BARE_NUMBER_WEIGHT,
        }
    }
}

/// Score of one standard against one piece of text
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScore {
    pub standard_code: String,
    pub spec_code: Option<String>,
    pub score: f32,
    /// At least one explicit numeric reference matched
    pub explicit: bool,
}

struct KeywordPattern {
    keyword: String,
    regex: Regex,
}

struct StandardPatterns {
    code: String,
    keywords: Vec<KeywordPattern>,
    specs: Vec<(String, Vec<KeywordPattern>)>,
}

#[derive(Default)]
struct Accumulator {
    explicit: Vec<RefKind>,
    explicit_spec: Option<String>,
    keyword_score: f32,
    spec_hits: HashMap<String, usize>,
}

/// Scores are kept to two decimals so equal evidence compares equal
fn round_score(score: f32) -> f32 {
    (score * 100.0).round() / 100.0
}

/// Matches section text against a taxonomy
pub struct PatternMatcher {
    taxonomy: Arc<Taxonomy>,
    standards: Vec<StandardPatterns>,
}

fn keyword_patterns(keywords: &[String]) -> Result<Vec<KeywordPattern>> {
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|keyword| {
            let regex = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword.trim())))
                .map_err(|e| Error::Config(format!("Bad taxonomy keyword '{}': {}", keyword, e)))?;
            Ok(KeywordPattern {
                keyword: keyword.to_lowercase(),
                regex,
            })
        })
        .collect()
}

impl PatternMatcher {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Result<Self> {
        let mut standards = Vec::with_capacity(taxonomy.standards.len());
        for standard in &taxonomy.standards {
            let mut specs = Vec::with_capacity(standard.specs.len());
            for spec in &standard.specs {
                specs.push((spec.code.clone(), keyword_patterns(&spec.keywords)?));
            }
            standards.push(StandardPatterns {
                code: standard.code.clone(),
                keywords: keyword_patterns(&standard.keywords)?,
                specs,
            });
        }
        Ok(Self { taxonomy, standards })
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    /// Score every standard that matched anything, best first.
    ///
    /// Ordering: score, then explicit references, then taxonomy order.
    pub fn score(&self, text: &str) -> Vec<StandardScore> {
        let mut acc: HashMap<&str, Accumulator> = HashMap::new();

        self.collect_explicit(text, &mut acc);

        for standard in &self.standards {
            let mut seen: Vec<&str> = Vec::new();
            for pattern in &standard.keywords {
                if !seen.contains(&pattern.keyword.as_str()) && pattern.regex.is_match(text) {
                    seen.push(&pattern.keyword);
                }
            }
            let mut spec_hits = HashMap::new();
            for (spec_code, patterns) in &standard.specs {
                let hits = patterns.iter().filter(|p| p.regex.is_match(text)).count();
                if hits > 0 {
                    spec_hits.insert(spec_code.clone(), hits);
                }
            }
            if seen.is_empty() && spec_hits.is_empty() {
                continue;
            }
            let entry = acc.entry(standard.code.as_str()).or_default();
            entry.keyword_score += seen.len() as f32 * STANDARD_KEYWORD_WEIGHT;
            for (spec_code, hits) in spec_hits {
                entry.keyword_score += hits as f32 * SPEC_KEYWORD_WEIGHT;
                *entry.spec_hits.entry(spec_code).or_default() += hits;
            }
        }

        let mut scores: Vec<StandardScore> = acc
            .into_iter()
            .map(|(code, acc)| {
                let explicit_score = acc
                    .explicit
                    .iter()
                    .map(|kind| kind.weight())
                    .sum::<f32>()
                    .min(MAX_SCORE);
                let spec_code = acc.explicit_spec.or_else(|| {
                    // most hits, then taxonomy order
                    let standard = self.taxonomy.standard(code)?;
                    standard
                        .specs
                        .iter()
                        .filter_map(|s| acc.spec_hits.get(&s.code).map(|h| (s.code.clone(), *h)))
                        .fold(None, |best: Option<(String, usize)>, (c, h)| match best {
                            Some((_, bh)) if bh >= h => best,
                            _ => Some((c, h)),
                        })
                        .map(|(c, _)| c)
                });
                StandardScore {
                    standard_code: code.to_string(),
                    spec_code,
                    score: round_score((explicit_score + acc.keyword_score).min(MAX_SCORE)),
                    explicit: !acc.explicit.is_empty(),
                }
            })
            .collect();

        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.explicit.cmp(&a.explicit))
                .then(self.rank(&a.standard_code).cmp(&self.rank(&b.standard_code)))
        });
        scores
    }

    /// Best-scoring standard, if any matched
    pub fn best(&self, text: &str) -> Option<StandardScore> {
        self.score(text).into_iter().next()
    }

    fn rank(&self, code: &str) -> usize {
        self.taxonomy.position(code).unwrap_or(usize::MAX)
    }

    fn collect_explicit<'a>(&'a self, text: &str, acc: &mut HashMap<&'a str, Accumulator>) {
        let mut record = |number: &str, spec: Option<&str>, kind: RefKind| {
            let Some(standard) = self.taxonomy.standard(number) else {
                return;
            };
            let entry = acc.entry(standard.code.as_str()).or_default();
            if !entry.explicit.contains(&kind) {
                entry.explicit.push(kind);
            }
            if entry.explicit_spec.is_none() {
                if let Some(spec) = spec.and_then(|s| standard.spec(s)) {
                    entry.explicit_spec = Some(spec.code.clone());
                }
            }
        };

        for caps in STANDARD_REF.captures_iter(text) {
            let spec = caps.get(2).map(|m| m.as_str());
            let kind = if spec.is_some() {
                RefKind::StandardWithSpec
            } else {
                RefKind::Standard
            };
            record(&caps[1], spec, kind);
        }
        for caps in CRITERION_REF.captures_iter(text) {
            record(&caps[1], caps.get(2).map(|m| m.as_str()), RefKind::Criterion);
        }
        for caps in BARE_REF.captures_iter(text) {
            record(&caps[1], caps.get(2).map(|m| m.as_str()), RefKind::Bare);
        }
    }
}
