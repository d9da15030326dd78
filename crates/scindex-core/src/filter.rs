//! The filter engine: decides whether and how a contract is indexed.
//!
//! A configuration is a map of rule name → [`FilterRule`]. Each rule lists tag
//! tokens to look for and a set of options:
//!
//! | Option | Meaning |
//! |--------|---------|
//! | `i`    | case-insensitive matching |
//! | `co`   | class-only: classify, but do not keep the install source |
//!
//! Tags match as whole tokens: the characters on either side of a match must
//! not be word characters. Rules are evaluated in name order; the first rule
//! with any matching tag supplies the class, and the matched tags of every
//! matching rule are unioned into the tag set.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, contract::join_tags};

// ─── Configuration ───────────────────────────────────────────────────────────

pub const OPTION_CASE_INSENSITIVE: &str = "i";
pub const OPTION_CLASS_ONLY: &str = "co";

/// One named rule, in its persisted JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
  #[serde(default)]
  pub tags:    Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub options: Vec<String>,
}

impl FilterRule {
  pub fn new<I, S>(tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self { tags: tags.into_iter().map(Into::into).collect(), options: Vec::new() }
  }

  pub fn with_option(mut self, option: &str) -> Self {
    self.options.push(option.to_owned());
    self
  }

  pub fn case_insensitive(&self) -> bool {
    self.options.iter().any(|o| o == OPTION_CASE_INSENSITIVE)
  }

  pub fn class_only(&self) -> bool {
    self.options.iter().any(|o| o == OPTION_CLASS_ONLY)
  }
}

/// The full rule map. A `BTreeMap` keeps evaluation order deterministic.
pub type FilterConfig = BTreeMap<String, FilterRule>;

/// Decode the persisted `Filters` setting.
pub fn parse_filter_config(json: &str) -> Result<FilterConfig> {
  serde_json::from_str(json).map_err(|e| Error::Config(format!("filters: {e}")))
}

/// Encode a configuration for the `Filters` setting.
pub fn encode_filter_config(config: &FilterConfig) -> Result<String> {
  Ok(serde_json::to_string(config)?)
}

/// The rule set used when no `Filters` setting has been saved.
pub fn default_filter_config() -> FilterConfig {
  let mut config = FilterConfig::new();
  config.insert(
    "g45".into(),
    FilterRule::new(["G45-AT", "G45-C", "G45-FAT", "G45-NAME", "T345"])
      .with_option(OPTION_CASE_INSENSITIVE),
  );
  config.insert("nfa".into(), FilterRule::new(["ART-NFA-MS1"]));
  config.insert("swaps".into(), FilterRule::new(["StartSwap"]));
  config.insert("tela".into(), FilterRule::new(["docVersion", "telaVersion"]));
  config.insert(
    "token".into(),
    FilterRule::new(["SEND_ASSET_TO_ADDRESS"])
      .with_option(OPTION_CASE_INSENSITIVE)
      .with_option(OPTION_CLASS_ONLY),
  );
  config
}

// ─── Compiled form ───────────────────────────────────────────────────────────

/// Outcome of a successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
  /// Name of the first matching rule.
  pub class:      String,
  /// Canonical comma-joined set of matched tags across all rules.
  pub tags:       String,
  /// The winning rule carries the class-only option.
  pub class_only: bool,
}

#[derive(Debug, Clone)]
struct CompiledTag {
  label:   String,
  pattern: Regex,
}

#[derive(Debug, Clone)]
struct CompiledRule {
  name:       String,
  class_only: bool,
  tags:       Vec<CompiledTag>,
}

/// A compiled, immutable rule set.
#[derive(Debug, Clone)]
pub struct FilterSet {
  rules: Vec<CompiledRule>,
}

impl FilterSet {
  /// Compile every tag of every rule. Unknown options are ignored with a
  /// warning; empty tags are skipped.
  pub fn compile(config: &FilterConfig) -> Result<Self> {
    let mut rules = Vec::with_capacity(config.len());
    for (name, rule) in config {
      for option in &rule.options {
        if option != OPTION_CASE_INSENSITIVE && option != OPTION_CLASS_ONLY {
          tracing::warn!(rule = %name, option = %option, "ignoring unknown filter option");
        }
      }

      let flags = if rule.case_insensitive() { "(?i)" } else { "" };
      let mut tags = Vec::with_capacity(rule.tags.len());
      for tag in rule.tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let source = format!(r"{flags}(?:^|\W){}(?:\W|$)", regex::escape(tag));
        let pattern = Regex::new(&source)
          .map_err(|e| Error::Config(format!("rule {name:?}, tag {tag:?}: {e}")))?;
        tags.push(CompiledTag { label: tag.to_owned(), pattern });
      }

      rules.push(CompiledRule { name: name.clone(), class_only: rule.class_only(), tags });
    }
    Ok(Self { rules })
  }

  pub fn len(&self) -> usize { self.rules.len() }

  pub fn is_empty(&self) -> bool { self.rules.is_empty() }

  /// Classify a contract install by its source text.
  pub fn classify_install(&self, code: &str) -> Option<Classification> {
    self.classify(&[code])
  }

  /// Classify an invocation by its argument names and rendered values.
  pub fn classify_invoke<'a, I>(&self, args: I) -> Option<Classification>
  where
    I: IntoIterator<Item = (&'a str, String)>,
  {
    let mut texts: Vec<String> = Vec::new();
    for (name, value) in args {
      texts.push(name.to_owned());
      texts.push(value);
    }
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    self.classify(&refs)
  }

  fn classify(&self, texts: &[&str]) -> Option<Classification> {
    if texts.iter().all(|t| t.trim().is_empty()) {
      return None;
    }

    let mut winner: Option<&CompiledRule> = None;
    let mut matched: Vec<&str> = Vec::new();

    for rule in &self.rules {
      let before = matched.len();
      for tag in &rule.tags {
        if texts.iter().any(|t| tag.pattern.is_match(t)) {
          matched.push(&tag.label);
        }
      }
      if matched.len() > before && winner.is_none() {
        winner = Some(rule);
      }
    }

    winner.map(|rule| Classification {
      class:      rule.name.clone(),
      tags:       join_tags(matched),
      class_only: rule.class_only,
    })
  }
}
