use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::settings::units::{is_aperture, is_shutter_speed};
use crate::settings::{SettingsRecord, SuggestionResult, SuggestionSource};

/// Rule table shipped with the crate.
const BUILTIN_RULES: &str = include_str!("../../assets/scenario_rules.json");

/// `matched_rule` reported when no scenario rule applies.
pub const DEFAULT_RULE_NAME: &str = "default";

/// Settings and explanation template produced by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub iso: u32,
    pub aperture: String,
    pub shutter_speed: String,
    /// May reference `{iso}`, `{aperture}`, `{shutter_speed}` and `{keyword}`.
    pub explanation: String,
}

/// A scenario keyed by phrases.
///
/// Matches when every group in `all_of` has at least one phrase present in
/// the prompt as whole words.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRule {
    pub name: String,
    pub all_of: Vec<Vec<String>>,
    pub outcome: RuleOutcome,
}

/// Ordered scenario rules; the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub version: String,
    pub rules: Vec<ScenarioRule>,
    pub default: RuleOutcome,
}

/// Result of matching a prompt against a [`RuleTable`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMatch<'a> {
    /// Rule name, or [`DEFAULT_RULE_NAME`].
    pub name: &'a str,
    pub outcome: &'a RuleOutcome,
    /// Phrase that satisfied the rule's first group.
    pub keyword: Option<&'a str>,
}

impl RuleTable {
    /// The embedded default table.
    pub fn builtin() -> Result<Self, EngineError> {
        Self::from_json(BUILTIN_RULES)
    }

    /// Load and validate a table from a JSON file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("cannot read rule table {}: {e}", path.display()))
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, EngineError> {
        let table: RuleTable = serde_json::from_str(data)
            .map_err(|e| EngineError::config(format!("invalid rule table JSON: {e}")))?;
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version.trim().is_empty() {
            return Err(EngineError::config("rule table version must not be empty"));
        }
        if self.rules.is_empty() {
            return Err(EngineError::config("rule table has no rules"));
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            let name = rule.name.trim();
            if name.is_empty() {
                return Err(EngineError::config("rule name must not be empty"));
            }
            if name == DEFAULT_RULE_NAME {
                return Err(EngineError::config(format!(
                    "rule name '{DEFAULT_RULE_NAME}' is reserved"
                )));
            }
            if !names.insert(name) {
                return Err(EngineError::config(format!("duplicate rule name '{name}'")));
            }
            if rule.all_of.is_empty() {
                return Err(EngineError::config(format!("rule '{name}' has no phrase groups")));
            }
            for group in &rule.all_of {
                if group.is_empty() || group.iter().any(|p| normalize_text(p).is_empty()) {
                    return Err(EngineError::config(format!(
                        "rule '{name}' has an empty phrase group or phrase"
                    )));
                }
            }
            validate_outcome(name, &rule.outcome)?;
        }
        validate_outcome(DEFAULT_RULE_NAME, &self.default)
    }

    /// Find the first rule whose phrase groups are all present in `prompt`.
    ///
    /// Phrases match whole prompt words, allowing a plural `s`/`es` ending,
    /// so "portrait" matches "portraits" but "dark" does not match "darkroom".
    pub fn match_prompt(&self, prompt: &str) -> RuleMatch<'_> {
        let normalized = normalize_text(prompt);
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();

        for rule in &self.rules {
            let mut keyword = None;
            let matched = rule.all_of.iter().enumerate().all(|(i, group)| {
                let hit = group.iter().find(|phrase| contains_phrase(&words, phrase));
                if i == 0 {
                    keyword = hit.map(String::as_str);
                }
                hit.is_some()
            });
            if matched {
                return RuleMatch {
                    name: &rule.name,
                    outcome: &rule.outcome,
                    keyword,
                };
            }
        }

        RuleMatch {
            name: DEFAULT_RULE_NAME,
            outcome: &self.default,
            keyword: None,
        }
    }

    /// Rule-based suggestion for a prompt.
    pub fn suggest(&self, prompt: &str, current: Option<&SettingsRecord>) -> SuggestionResult {
        let m = self.match_prompt(prompt);
        log::debug!("Scenario rule '{}' matched (keyword: {:?})", m.name, m.keyword);

        let mut explanation = render(&m.outcome.explanation, m.outcome, m.keyword.unwrap_or(""));
        if let Some(summary) = current.and_then(SettingsRecord::summary) {
            explanation.push_str(&format!(" Your current settings are {summary}."));
        }

        SuggestionResult {
            iso: Some(m.outcome.iso),
            aperture: Some(m.outcome.aperture.clone()),
            shutter_speed: Some(m.outcome.shutter_speed.clone()),
            explanation: Some(explanation),
            source: SuggestionSource::RuleBased,
            matched_rule: Some(m.name.to_string()),
            backend: None,
        }
    }
}

fn validate_outcome(name: &str, outcome: &RuleOutcome) -> Result<(), EngineError> {
    if outcome.iso == 0 {
        return Err(EngineError::config(format!("rule '{name}': iso must be positive")));
    }
    if !is_aperture(&outcome.aperture) {
        return Err(EngineError::config(format!(
            "rule '{name}': aperture '{}' is not f/<number>",
            outcome.aperture
        )));
    }
    if !is_shutter_speed(&outcome.shutter_speed) {
        return Err(EngineError::config(format!(
            "rule '{name}': shutter speed '{}' is not <fraction>s or <seconds>s",
            outcome.shutter_speed
        )));
    }
    if outcome.explanation.trim().is_empty() {
        return Err(EngineError::config(format!("rule '{name}': explanation is empty")));
    }
    Ok(())
}

/// True when the words of `phrase` appear consecutively in `words`.
fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let phrase = normalize_text(phrase);
    let needle: Vec<&str> = phrase.split(' ').filter(|w| !w.is_empty()).collect();
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(&needle)
            .all(|(word, stem)| word_matches(word, stem))
    })
}

/// `word` is `stem` or its plural (`portraits`, `beaches`).
fn word_matches(word: &str, stem: &str) -> bool {
    match word.strip_prefix(stem) {
        Some(rest) => matches!(rest, "" | "s" | "es"),
        None => false,
    }
}

/// Lower-case, turn every non-alphanumeric character into a space and
/// collapse runs of whitespace.
fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn render(template: &str, outcome: &RuleOutcome, keyword: &str) -> String {
    template
        .replace("{iso}", &outcome.iso.to_string())
        .replace("{aperture}", &outcome.aperture)
        .replace("{shutter_speed}", &outcome.shutter_speed)
        .replace("{keyword}", keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable {
        RuleTable::builtin().unwrap()
    }

    fn triple(result: &SuggestionResult) -> (u32, &str, &str) {
        (
            result.iso.unwrap(),
            result.aperture.as_deref().unwrap(),
            result.shutter_speed.as_deref().unwrap(),
        )
    }

    // ── Built-in table ───────────────────────────────────────────────

    #[test]
    fn builtin_table_is_valid() {
        let t = table();
        let names: Vec<_> = t.rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["portrait_low_light", "portrait", "landscape", "action", "low_light"]
        );
    }

    #[test]
    fn portrait_in_low_light_prefers_the_combined_rule() {
        let r = table().suggest("Portrait of a friend in low light", None);
        assert_eq!(triple(&r), (1600, "f/1.8", "1/125s"));
        assert_eq!(r.matched_rule.as_deref(), Some("portrait_low_light"));
        assert_eq!(r.source, SuggestionSource::RuleBased);
        assert!(r.explanation.as_deref().unwrap().contains("portrait"));
    }

    #[test]
    fn single_scenarios() {
        let t = table();
        assert_eq!(triple(&t.suggest("a portrait", None)), (400, "f/2.8", "1/125s"));
        assert_eq!(triple(&t.suggest("Mountain scenery at noon", None)), (100, "f/11", "1/60s"));
        assert_eq!(triple(&t.suggest("kids running", None)), (800, "f/4", "1/1000s"));
        assert_eq!(triple(&t.suggest("city at NIGHT", None)), (1600, "f/2.8", "1/60s"));
    }

    #[test]
    fn order_breaks_ties() {
        // Both "landscape" and "action" match; the earlier rule wins.
        let r = table().suggest("fast clouds over a landscape", None);
        assert_eq!(r.matched_rule.as_deref(), Some("landscape"));
    }

    #[test]
    fn unmatched_prompt_uses_default() {
        let r = table().suggest("a bowl of fruit", None);
        assert_eq!(triple(&r), (400, "f/5.6", "1/125s"));
        assert_eq!(r.matched_rule.as_deref(), Some(DEFAULT_RULE_NAME));
        assert!(r.explanation.as_deref().unwrap().starts_with("General purpose settings"));
    }

    #[test]
    fn matching_respects_word_boundaries() {
        let t = table();
        // "darkroom" is not "dark", "fastidious" is not "fast".
        assert_eq!(t.match_prompt("a fastidious darkroom print").name, DEFAULT_RULE_NAME);
        // Punctuation and case do not matter; multi-word phrases match.
        assert_eq!(t.match_prompt("Shooting in LOW-LIGHT!").name, "low_light");
    }

    #[test]
    fn plural_prompts_match_their_rules() {
        let t = table();
        assert_eq!(t.match_prompt("portraits in low light").name, "portrait_low_light");
        assert_eq!(t.match_prompt("landscapes at sunset").name, "landscape");
        assert_eq!(t.match_prompt("mountains at dawn").name, "landscape");
        assert_eq!(t.match_prompt("faces at nights out").name, "portrait_low_light");
        // A longer word sharing the prefix is still a different word.
        assert_eq!(t.match_prompt("a dimension of portraiture").name, DEFAULT_RULE_NAME);
    }

    #[test]
    fn keyword_is_the_authored_phrase() {
        assert_eq!(table().match_prompt("Portraits, low light").keyword, Some("portrait"));
    }

    #[test]
    fn explanation_template_is_rendered() {
        let r = table().suggest("sports day", None);
        let text = r.explanation.unwrap();
        assert!(text.contains("1/1000s"));
        assert!(text.contains("(sports)"));
        assert!(!text.contains('{'));
    }

    #[test]
    fn current_settings_are_mentioned() {
        let current = SettingsRecord {
            iso: Some(3200),
            shutter_speed: Some("1/30s".into()),
            ..Default::default()
        };
        let r = table().suggest("portrait", Some(&current));
        assert!(r.explanation.unwrap().ends_with("Your current settings are ISO 3200, 1/30s."));
    }

    // ── Validation ───────────────────────────────────────────────────

    #[test]
    fn custom_table_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{
                "version": "test",
                "rules": [{
                    "name": "macro",
                    "all_of": [["macro", "close up"]],
                    "outcome": {"iso": 200, "aperture": "f/16", "shutter_speed": "1/200s", "explanation": "Deep focus for {keyword}."}
                }],
                "default": {"iso": 400, "aperture": "f/5.6", "shutter_speed": "1/125s", "explanation": "Balanced."}
            }"#,
        )
        .unwrap();

        let t = RuleTable::load(&path).unwrap();
        let r = t.suggest("Close-up of a bee", None);
        assert_eq!(r.matched_rule.as_deref(), Some("macro"));
        assert_eq!(r.explanation.as_deref(), Some("Deep focus for close up."));
    }

    #[test]
    fn invalid_tables_are_config_errors() {
        let mut t = table();
        t.rules.clear();
        assert!(matches!(t.validate(), Err(EngineError::InvalidConfig(_))));

        let mut t = table();
        t.rules[1].name = t.rules[0].name.clone();
        assert!(t.validate().is_err(), "duplicate name");

        let mut t = table();
        t.rules[0].all_of.push(vec![]);
        assert!(t.validate().is_err(), "empty group");

        let mut t = table();
        t.rules[2].outcome.aperture = "11".into();
        assert!(t.validate().is_err(), "bad aperture");

        let mut t = table();
        t.default.shutter_speed = "1/125".into();
        assert!(t.validate().is_err(), "bad shutter");

        assert!(matches!(
            RuleTable::from_json("{not json"),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(RuleTable::load(Path::new("/nonexistent/rules.json")).is_err());
    }
}
