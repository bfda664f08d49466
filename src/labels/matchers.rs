use crate::common::constants::METRIC_NAME_LABEL;
use crate::labels::Label;
use regex::Regex;
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MatchOp {
    Eq,
    Neq,
    Re,
    Nre,
}

impl Display for MatchOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            MatchOp::Eq => write!(f, "="),
            MatchOp::Neq => write!(f, "!="),
            MatchOp::Re => write!(f, "=~"),
            MatchOp::Nre => write!(f, "!~"),
        }
    }
}

/// A label matcher used by query-time series lookup, as named in
/// `QueryRequest.matchers`.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub op: MatchOp,
    pub name: String,
    pub value: String,
    regex: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct InvalidRegex(pub String);

impl Display for InvalidRegex {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "invalid regex matcher pattern: {}", self.0)
    }
}

impl std::error::Error for InvalidRegex {}

impl Matcher {
    pub fn new<N: Into<String>, V: Into<String>>(
        op: MatchOp,
        name: N,
        value: V,
    ) -> Result<Self, InvalidRegex> {
        let name = name.into();
        let value = value.into();
        let regex = match op {
            MatchOp::Re | MatchOp::Nre => {
                let anchored = format!("^(?:{value})$");
                Some(Regex::new(&anchored).map_err(|_| InvalidRegex(value.clone()))?)
            }
            MatchOp::Eq | MatchOp::Neq => None,
        };
        Ok(Self {
            op,
            name,
            value,
            regex,
        })
    }

    pub fn eq<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Matcher::new(MatchOp::Eq, name, value).expect("Eq matcher never fails to construct")
    }

    pub fn matches(&self, value: &str) -> bool {
        match self.op {
            MatchOp::Eq => self.value == value,
            MatchOp::Neq => self.value != value,
            MatchOp::Re => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchOp::Nre => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Whether `labels` satisfies this matcher. A label not present in the set
    /// is treated as carrying the empty string, matching Prometheus semantics.
    pub fn matches_labels(&self, labels: &[Label]) -> bool {
        let value = labels
            .iter()
            .find(|l| l.name == self.name)
            .map(|l| l.value.as_str())
            .unwrap_or("");
        self.matches(value)
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op && self.name == other.name && self.value == other.value
    }
}

/// A set of matchers, all of which must hold (logical AND) for a series to
/// be selected — the conjunction used by `QueryRequest.matchers`.
#[derive(Debug, Clone, Default)]
pub struct Matchers(pub Vec<Matcher>);

impl Matchers {
    pub fn new(matchers: Vec<Matcher>) -> Self {
        Self(matchers)
    }

    pub fn matches(&self, labels: &[Label]) -> bool {
        self.0.iter().all(|m| m.matches_labels(labels))
    }

    /// Equality matchers only, used by [`crate::tenant::UserState::series_matching`]
    /// to probe the label-index postings before falling back to a full scan.
    pub fn equality_matchers(&self) -> impl Iterator<Item = &Matcher> {
        self.0.iter().filter(|m| m.op == MatchOp::Eq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<Label> {
        vec![Label::new("__name__", "m"), Label::new("job", "api")]
    }

    #[test]
    fn eq_matches_exact_value() {
        let m = Matcher::eq(METRIC_NAME_LABEL, "m");
        assert!(m.matches_labels(&labels()));
    }

    #[test]
    fn neq_rejects_exact_value() {
        let m = Matcher::new(MatchOp::Neq, "job", "api").unwrap();
        assert!(!m.matches_labels(&labels()));
    }

    #[test]
    fn regex_anchors_the_whole_value() {
        let m = Matcher::new(MatchOp::Re, "job", "a.*").unwrap();
        assert!(m.matches_labels(&labels()));
        let m = Matcher::new(MatchOp::Re, "job", "a").unwrap();
        assert!(!m.matches_labels(&labels()));
    }

    #[test]
    fn missing_label_treated_as_empty_string() {
        let m = Matcher::eq("absent", "");
        assert!(m.matches_labels(&labels()));
    }

    #[test]
    fn matchers_conjunction_requires_all() {
        let matchers = Matchers::new(vec![
            Matcher::eq(METRIC_NAME_LABEL, "m"),
            Matcher::eq("job", "other"),
        ]);
        assert!(!matchers.matches(&labels()));
    }
}
