//! Rule-based tag extraction.
//!
//! A message body is matched against an ordered table of `{pattern, tag}`
//! rules. Every rule whose regex matches anywhere in the body contributes its
//! tag once, in rule order. The table is data: it comes from the `[tags]`
//! config section, with [`TagRule::defaults`] used when none is configured.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// One `(pattern, tag)` entry of the rule table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TagRule {
    /// A `regex` crate pattern. Matching is Unicode-aware.
    pub pattern: String,
    pub tag: String,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl TagRule {
    pub fn new(pattern: &str, tag: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            tag: tag.to_string(),
            case_insensitive: false,
        }
    }

    /// Built-in table, tuned for Chinese-language chat.
    pub fn defaults() -> Vec<TagRule> {
        vec![
            TagRule::new("明天|后天|下周|下个月", "#待确认"),
            TagRule::new("记得|别忘了|记得要", "#待办"),
            TagRule::new("bug|问题|错误|报错|失败", "#问题追踪"),
            TagRule::new("决定|确定|定了|就这么办", "#决策点"),
            TagRule::new(r"\?|？", "#待回复"),
            TagRule::new("备份|存档|归档", "#归档"),
            TagRule::new("灵感|创意|想法", "#灵感"),
        ]
    }
}

/// Compiled rule table.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    rules: Vec<(Regex, String)>,
}

impl TagExtractor {
    pub fn new(rules: &[TagRule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            let re = RegexBuilder::new(&rule.pattern)
                .case_insensitive(rule.case_insensitive)
                .build()
                .with_context(|| format!("invalid tag rule {} (pattern {:?})", i, rule.pattern))?;
            compiled.push((re, rule.tag.clone()));
        }
        Ok(Self { rules: compiled })
    }

    /// Extractor over [`TagRule::defaults`].
    pub fn with_defaults() -> Self {
        // The built-in patterns are literals known to compile.
        Self::new(&TagRule::defaults()).unwrap_or(Self { rules: Vec::new() })
    }

    /// Tags for `body`, deduplicated, in first-fire order.
    pub fn extract(&self, body: &str) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for (re, tag) in &self.rules {
            if re.is_match(body) && !tags.iter().any(|t| t == tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
