use std::{collections::BTreeMap, fmt, str::FromStr};

/// Equality-based label selector in kubectl syntax, e.g. `app=web,tier!=db,canary,!legacy`.
///
/// Requirements are ANDed. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(key, value) => labels.get(key) == Some(value),
            Self::NotEquals(key, value) => labels.get(key) != Some(value),
            Self::Exists(key) => labels.contains_key(key),
            Self::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|req| req.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let requirements = s
            .split(',')
            .map(|term| parse_requirement(term.trim()))
            .collect::<Result<_, _>>()?;
        Ok(Self { requirements })
    }
}

fn parse_requirement(term: &str) -> Result<Requirement, SelectorError> {
    let requirement = if let Some((key, value)) = term.split_once("!=") {
        Requirement::NotEquals(key.trim().to_owned(), value.trim().to_owned())
    } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        Requirement::Equals(key.trim().to_owned(), value.trim().to_owned())
    } else if let Some(key) = term.strip_prefix('!') {
        Requirement::DoesNotExist(key.trim().to_owned())
    } else {
        Requirement::Exists(term.to_owned())
    };

    let key = match &requirement {
        Requirement::Equals(key, _)
        | Requirement::NotEquals(key, _)
        | Requirement::Exists(key)
        | Requirement::DoesNotExist(key) => key,
    };
    if !is_valid_key(key) {
        return Err(SelectorError::InvalidKey {
            term: term.to_owned(),
        });
    }
    Ok(requirement)
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match req {
                Requirement::Equals(key, value) => write!(f, "{key}={value}")?,
                Requirement::NotEquals(key, value) => write!(f, "{key}!={value}")?,
                Requirement::Exists(key) => f.write_str(key)?,
                Requirement::DoesNotExist(key) => write!(f, "!{key}")?,
            }
        }
        Ok(())
    }
}

/// The error type returned when parsing a [`LabelSelector`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("invalid label selector requirement {term:?}")]
    InvalidKey { term: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn everything_matches_unlabelled_objects() {
        let selector: LabelSelector = "".parse().unwrap();
        assert!(selector.is_everything());
        assert!(selector.matches(None));
        assert!(selector.matches(Some(&labels(&[("app", "web")]))));
    }

    #[test]
    fn requirements_are_anded() {
        let selector: LabelSelector = "app=web, tier!=db,canary,!legacy".parse().unwrap();
        assert_eq!(selector.to_string(), "app=web,tier!=db,canary,!legacy");

        assert!(selector.matches(Some(&labels(&[("app", "web"), ("canary", "")]))));
        assert!(selector.matches(Some(&labels(&[
            ("app", "web"),
            ("canary", "1"),
            ("tier", "api"),
        ]))));
        assert!(!selector.matches(Some(&labels(&[("app", "web")]))));
        assert!(!selector.matches(Some(&labels(&[
            ("app", "web"),
            ("canary", "1"),
            ("tier", "db"),
        ]))));
        assert!(!selector.matches(Some(&labels(&[
            ("app", "web"),
            ("canary", "1"),
            ("legacy", "true"),
        ]))));
        assert!(!selector.matches(None));
    }

    #[test]
    fn double_equals_is_equality() {
        let selector: LabelSelector = "app==web".parse().unwrap();
        assert_eq!(selector, "app=web".parse::<LabelSelector>().unwrap());
    }

    #[test]
    fn rejects_empty_and_malformed_keys() {
        assert!(matches!(
            "app=web,,tier=db".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
        assert!(matches!(
            "=web".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
        assert!(matches!(
            "app in (web)".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey { .. })
        ));
    }
}
