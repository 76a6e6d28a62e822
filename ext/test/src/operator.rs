//! Condition operators understood by the reference engine.

use std::collections::{HashMap, HashSet};

use regex::{Regex, RegexBuilder};

use ddwaf::Value;

/// A compiled condition operator.
#[derive(Debug, Clone)]
pub enum Operator {
    /// `match_regex`: the pattern matches somewhere in the value.
    MatchRegex { regex: Regex },
    /// `exact_match`: the value equals one of the listed strings.
    ExactMatch(ExactList),
    /// `phrase_match`: the value contains one of the phrases.
    PhraseMatch { phrases: Vec<String> },
}

/// Source of `exact_match` values.
#[derive(Debug, Clone)]
pub enum ExactList {
    Inline(HashSet<String>),
    /// Resolved against `rules_data` at evaluation time.
    Data(String),
}

impl Operator {
    /// Compile `name` with its `parameters` map.
    pub fn parse(name: &str, parameters: &Value) -> Result<Self, String> {
        match name {
            "match_regex" => {
                let pattern = parameters
                    .get("regex")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "missing key 'regex'".to_owned())?;
                let case_sensitive = parameters
                    .get("options")
                    .and_then(|o| o.get("case_sensitive"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(!case_sensitive)
                    .build()
                    .map_err(|e| format!("invalid regular expression: {e}"))?;
                Ok(Self::MatchRegex { regex })
            }
            "exact_match" => {
                if let Some(id) = parameters.get("data").and_then(Value::as_str) {
                    return Ok(Self::ExactMatch(ExactList::Data(id.to_owned())));
                }
                let list = string_list(parameters.get("list"))
                    .ok_or_else(|| "missing key 'list' or 'data'".to_owned())?;
                Ok(Self::ExactMatch(ExactList::Inline(list.into_iter().collect())))
            }
            "phrase_match" => {
                let phrases = string_list(parameters.get("list"))
                    .ok_or_else(|| "missing key 'list'".to_owned())?;
                Ok(Self::PhraseMatch {
                    phrases: phrases.into_iter().map(|p| p.to_lowercase()).collect(),
                })
            }
            other => Err(format!("unknown operator: '{other}'")),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MatchRegex { .. } => "match_regex",
            Self::ExactMatch(_) => "exact_match",
            Self::PhraseMatch { .. } => "phrase_match",
        }
    }

    /// The operator's parameter as reported in events.
    #[must_use]
    pub fn operator_value(&self) -> String {
        match self {
            Self::MatchRegex { regex } => regex.as_str().to_owned(),
            Self::ExactMatch(_) | Self::PhraseMatch { .. } => String::new(),
        }
    }

    /// Match one scalar; returns the highlighted part on success.
    #[must_use]
    pub fn matches(&self, text: &str, data: &HashMap<String, HashSet<String>>) -> Option<String> {
        match self {
            Self::MatchRegex { regex } => regex.find(text).map(|m| m.as_str().to_owned()),
            Self::ExactMatch(ExactList::Inline(list)) => {
                list.contains(text).then(|| text.to_owned())
            }
            Self::ExactMatch(ExactList::Data(id)) => data
                .get(id)
                .filter(|values| values.contains(text))
                .map(|_| text.to_owned()),
            Self::PhraseMatch { phrases } => {
                let lowered = text.to_lowercase();
                phrases
                    .iter()
                    .find(|p| lowered.contains(p.as_str()))
                    .cloned()
            }
        }
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_data() -> HashMap<String, HashSet<String>> {
        HashMap::new()
    }

    #[test]
    fn regex_is_case_insensitive_by_default() {
        let op = Operator::parse("match_regex", &Value::map([("regex", "rule1")])).unwrap();
        assert_eq!(op.matches("xxRULE1xx", &no_data()).as_deref(), Some("RULE1"));
        assert_eq!(op.matches("rule2", &no_data()), None);
    }

    #[test]
    fn regex_case_sensitive_option() {
        let params = Value::map([
            ("regex", Value::from("Admin")),
            ("options", Value::map([("case_sensitive", true)])),
        ]);
        let op = Operator::parse("match_regex", &params).unwrap();
        assert!(op.matches("admin", &no_data()).is_none());
        assert!(op.matches("Admin", &no_data()).is_some());
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = Operator::parse("match_regex", &Value::map([("regex", "(")])).unwrap_err();
        assert!(err.starts_with("invalid regular expression"));
    }

    #[test]
    fn exact_match_inline_and_data() {
        let op = Operator::parse("exact_match", &Value::map([("list", Value::array(["a", "b"]))]))
            .unwrap();
        assert!(op.matches("a", &no_data()).is_some());
        assert!(op.matches("ab", &no_data()).is_none());

        let op = Operator::parse("exact_match", &Value::map([("data", "blocked")])).unwrap();
        let mut data = HashMap::new();
        data.insert("blocked".to_owned(), HashSet::from(["1.2.3.4".to_owned()]));
        assert!(op.matches("1.2.3.4", &data).is_some());
        assert!(op.matches("1.2.3.4", &no_data()).is_none());
    }

    #[test]
    fn phrase_match_ignores_case() {
        let op = Operator::parse("phrase_match", &Value::map([("list", Value::array(["drop table"]))]))
            .unwrap();
        assert_eq!(op.matches("1; DROP TABLE users", &no_data()).as_deref(), Some("drop table"));
    }

    #[test]
    fn unknown_operator() {
        assert_eq!(
            Operator::parse("is_xss", &Value::empty_map()).unwrap_err(),
            "unknown operator: 'is_xss'"
        );
    }
}
