//! Override rules and the process-wide rule registry.
//!
//! A [`Rule`] tightens (or loosens) the limit for the subset of keys its
//! regex matches, optionally scoped to a single named throttler. Rules live
//! in a [`RuleRegistry`] shared by every throttler's admission path and can
//! be loaded in bulk from JSON documents.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::info;

use crate::error::{Result, ThrottlrError};
use crate::window::Window;

/// A named limit override matched by key regex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Unique name; adding a rule with an existing name replaces it.
    pub rule_name: String,
    /// Pattern tested against the built lookup key.
    pub key_regex_pattern: String,
    /// Replaces the window's ceiling while the rule applies.
    pub max_override: u64,
    /// Replaces the window's time window while the rule applies.
    #[serde(with = "humantime_serde")]
    pub time_window_override: Duration,
    /// Restricts the rule to one named throttler; unset means all.
    #[serde(default)]
    pub throttler_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Rule {
    pub fn new(
        rule_name: impl Into<String>,
        key_regex_pattern: impl Into<String>,
        max_override: u64,
        time_window_override: Duration,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            key_regex_pattern: key_regex_pattern.into(),
            max_override,
            time_window_override,
            throttler_name: None,
            enabled: true,
        }
    }

    /// Restricts this rule to the named throttler.
    pub fn scoped_to(mut self, throttler_name: impl Into<String>) -> Self {
        self.throttler_name = Some(throttler_name.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Compiles the key pattern; invalid patterns are configuration errors.
    pub fn compile_pattern(&self) -> Result<Regex> {
        Regex::new(&self.key_regex_pattern).map_err(|source| ThrottlrError::RulePattern {
            pattern: self.key_regex_pattern.clone(),
            source,
        })
    }

    /// True unless a throttler-name scope is set and differs.
    pub fn matches_throttler(&self, throttler_name: &str) -> bool {
        self.throttler_name
            .as_deref()
            .map_or(true, |scope| scope == throttler_name)
    }

    /// True if this rule governs the given built key under the named
    /// throttler. Compiles the pattern on every call; the registry keeps a
    /// precompiled copy for the hot path.
    pub fn applies_to_key(&self, throttler_name: &str, key: &str) -> Result<bool> {
        if !self.matches_throttler(throttler_name) {
            return Ok(false);
        }
        Ok(self.enabled && self.compile_pattern()?.is_match(key))
    }

    /// True if this rule governs a stored window. Only the scope and the
    /// enabled flag are checked: the window no longer exposes the subject
    /// the pattern was written against.
    pub fn applies_to_window(&self, window: &Window) -> bool {
        self.matches_throttler(&window.throttler_name) && self.enabled
    }
}

struct CompiledRule {
    rule: Rule,
    regex: Regex,
}

/// Process-wide registry of override rules.
///
/// Read on every admission check, written rarely. Iteration order is
/// insertion order; replacing a rule by name keeps its position.
#[derive(Default)]
pub struct RuleRegistry {
    rules: RwLock<Vec<CompiledRule>>,
}

static SHARED: OnceLock<Arc<RuleRegistry>> = OnceLock::new();

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default instance. A convenience facade; throttlers
    /// accept an explicitly injected registry as well.
    pub fn shared() -> Arc<RuleRegistry> {
        SHARED.get_or_init(|| Arc::new(RuleRegistry::new())).clone()
    }

    /// Adds a rule, or replaces the existing rule of the same name in place.
    pub fn add_or_update(&self, rule: Rule) -> Result<()> {
        let regex = rule.compile_pattern()?;
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|c| c.rule.rule_name == rule.rule_name) {
            Some(existing) => *existing = CompiledRule { rule, regex },
            None => rules.push(CompiledRule { rule, regex }),
        }
        Ok(())
    }

    pub fn add_or_update_many(&self, rules: impl IntoIterator<Item = Rule>) -> Result<()> {
        for rule in rules {
            self.add_or_update(rule)?;
        }
        Ok(())
    }

    pub fn remove(&self, rule_name: &str) -> Option<Rule> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|c| c.rule.rule_name == rule_name)?;
        Some(rules.remove(index).rule)
    }

    /// Finds the rule governing `key` under the named throttler.
    ///
    /// Scans every registered rule and keeps the last applicable one rather
    /// than stopping at the first match.
    pub fn find_rule(&self, throttler_name: &str, key: &str) -> Option<Rule> {
        let rules = self.rules.read();
        let mut matched = None;
        for compiled in rules.iter() {
            if compiled.rule.matches_throttler(throttler_name)
                && compiled.rule.enabled
                && compiled.regex.is_match(key)
            {
                matched = Some(compiled.rule.clone());
            }
        }
        matched
    }

    /// Finds the rule governing a stored window; same last-match-wins scan,
    /// without the regex test (see [`Rule::applies_to_window`]).
    pub fn find_rule_for_window(&self, window: &Window) -> Option<Rule> {
        let rules = self.rules.read();
        let mut matched = None;
        for compiled in rules.iter() {
            if compiled.rule.applies_to_window(window) {
                matched = Some(compiled.rule.clone());
            }
        }
        matched
    }

    /// Loads a JSON document holding an array of rule definitions.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let rules: Vec<Rule> = serde_json::from_str(&contents)?;
        let count = rules.len();
        self.add_or_update_many(rules)?;
        info!(path = %path.display(), count, "loaded throttling rules");
        Ok(count)
    }

    /// Loads several rule documents in order; later documents win on name
    /// collisions.
    pub fn load_files<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> Result<usize> {
        let mut total = 0;
        for path in paths {
            total += self.load_file(path)?;
        }
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn clear(&self) {
        self.rules.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{LimiterKind, WindowKind};

    fn rule(name: &str, pattern: &str, max: u64) -> Rule {
        Rule::new(name, pattern, max, Duration::from_secs(10))
    }

    #[test]
    fn scoped_rule_never_applies_to_other_throttlers() {
        let scoped = rule("scoped", ".*", 1).scoped_to("orders");
        assert!(scoped.applies_to_key("orders", "orders:user:1").unwrap());
        assert!(!scoped.applies_to_key("uploads", "orders:user:1").unwrap());

        let window = Window::new(
            "uploads",
            LimiterKind::RateLimiter,
            WindowKind::Sliding,
            5,
            Duration::from_secs(60),
        );
        assert!(!scoped.applies_to_window(&window));
    }

    #[test]
    fn unmatched_pattern_does_not_apply() {
        let narrow = rule("narrow", "^orders:vip:", 1);
        assert!(!narrow.applies_to_key("orders", "orders:user:1").unwrap());
        assert!(narrow.applies_to_key("orders", "orders:vip:9").unwrap());
    }

    #[test]
    fn disabled_rule_never_applies() {
        let off = rule("off", ".*", 1).disabled();
        assert!(!off.applies_to_key("orders", "orders:user:1").unwrap());
    }

    #[test]
    fn invalid_pattern_is_rejected_at_registration() {
        let registry = RuleRegistry::new();
        let bad = rule("bad", "(unclosed", 1);
        assert!(matches!(
            registry.add_or_update(bad),
            Err(ThrottlrError::RulePattern { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn last_applicable_rule_wins() {
        let registry = RuleRegistry::new();
        registry.add_or_update(rule("first", "^user:", 10)).unwrap();
        registry.add_or_update(rule("second", "^user:", 20)).unwrap();
        registry
            .add_or_update(rule("unrelated", "^admin:", 30))
            .unwrap();

        let matched = registry.find_rule("any", "user:42").unwrap();
        assert_eq!(matched.rule_name, "second");
    }

    #[test]
    fn replacing_a_rule_keeps_its_position() {
        let registry = RuleRegistry::new();
        registry.add_or_update(rule("a", "^user:", 10)).unwrap();
        registry.add_or_update(rule("b", "^user:", 20)).unwrap();

        // Replace "a"; "b" remains later in iteration order and still wins.
        registry.add_or_update(rule("a", "^user:", 99)).unwrap();
        let matched = registry.find_rule("any", "user:42").unwrap();
        assert_eq!(matched.rule_name, "b");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn window_rule_lookup_keeps_the_last_applicable_match() {
        let registry = RuleRegistry::new();
        registry.add_or_update(rule("broad", ".*", 5)).unwrap();
        registry
            .add_or_update(rule("later", "^never-matches$", 7))
            .unwrap();
        registry
            .add_or_update(rule("elsewhere", ".*", 9).scoped_to("uploads"))
            .unwrap();
        registry.add_or_update(rule("off", ".*", 11).disabled()).unwrap();

        let window = Window::new(
            "orders",
            LimiterKind::RateLimiter,
            WindowKind::Sliding,
            5,
            Duration::from_secs(60),
        );

        // A stored window carries no key for the pattern to re-test, so
        // "later" applies despite its unmatched regex; the scan keeps the
        // last in-scope enabled rule, skipping the scoped and disabled ones.
        let matched = registry.find_rule_for_window(&window).unwrap();
        assert_eq!(matched.rule_name, "later");
    }

    #[test]
    fn remove_by_name() {
        let registry = RuleRegistry::new();
        registry.add_or_update(rule("gone", ".*", 1)).unwrap();
        assert_eq!(registry.remove("gone").map(|r| r.rule_name), Some("gone".into()));
        assert!(registry.remove("gone").is_none());
        assert!(registry.find_rule("any", "anything").is_none());
    }

    #[test]
    fn rule_document_round_trip() {
        let json = r#"[
            {
                "ruleName": "vip-burst",
                "keyRegexPattern": "^orders:vip:",
                "maxOverride": 100,
                "timeWindowOverride": "30s",
                "throttlerName": "orders"
            },
            {
                "ruleName": "abuser",
                "keyRegexPattern": "^orders:user:666$",
                "maxOverride": 1,
                "timeWindowOverride": "10m",
                "enabled": false
            }
        ]"#;

        let rules: Vec<Rule> = serde_json::from_str(json).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].throttler_name.as_deref(), Some("orders"));
        assert!(rules[0].enabled);
        assert_eq!(rules[0].time_window_override, Duration::from_secs(30));
        assert!(!rules[1].enabled);
        assert_eq!(rules[1].time_window_override, Duration::from_secs(600));
    }

    #[test]
    fn load_file_registers_every_rule() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("throttlr-rules-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"ruleName": "r1", "keyRegexPattern": ".*", "maxOverride": 5, "timeWindowOverride": "1m"}]"#,
        )
        .unwrap();

        let registry = RuleRegistry::new();
        assert_eq!(registry.load_file(&path).unwrap(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_rule("any", "key").is_some());

        std::fs::remove_file(&path).ok();
    }
}
