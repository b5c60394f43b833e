//! Minimal URI templates of the form `scheme://host/{name}`.
//!
//! A placeholder binds a non-empty run of characters up to the first
//! occurrence of the literal text that follows it, and never spans a `/`.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    source: String,
    parts: Vec<Part>,
}

impl UriTemplate {
    /// Does `pattern` contain any placeholder?
    pub fn is_template(pattern: &str) -> bool {
        pattern.contains('{') || pattern.contains('}')
    }

    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidUriTemplate {
            template: source.to_string(),
            message: message.to_string(),
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(invalid("nested '{'")),
                            c if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                            c => {
                                return Err(invalid(&format!(
                                    "invalid character '{c}' in placeholder"
                                )))
                            }
                        }
                    }
                    if !closed {
                        return Err(invalid("unterminated placeholder"));
                    }
                    if name.is_empty() {
                        return Err(invalid("empty placeholder name"));
                    }
                    if literal.is_empty() && matches!(parts.last(), Some(Part::Var(_))) {
                        return Err(invalid("adjacent placeholders are ambiguous"));
                    }
                    if parts.iter().any(|p| matches!(p, Part::Var(v) if *v == name)) {
                        return Err(invalid(&format!("duplicate placeholder '{name}'")));
                    }
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(Part::Var(name));
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Var(name) => Some(name.as_str()),
            Part::Literal(_) => None,
        })
    }

    /// Match `uri` against the template, returning the bound placeholders.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut rest = uri;
        let mut bound = HashMap::new();
        for (idx, part) in self.parts.iter().enumerate() {
            match part {
                Part::Literal(text) => rest = rest.strip_prefix(text.as_str())?,
                Part::Var(name) => {
                    let end = match self.parts.get(idx + 1) {
                        Some(Part::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    bound.insert(name.clone(), value.to_string());
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(bound)
    }

    /// Ordering key for competing matches: longer literal prefix first, then
    /// more literal characters overall.
    pub fn specificity(&self) -> (usize, usize) {
        let prefix = match self.parts.first() {
            Some(Part::Literal(text)) => text.len(),
            _ => 0,
        };
        let total = self
            .parts
            .iter()
            .map(|p| match p {
                Part::Literal(text) => text.len(),
                Part::Var(_) => 0,
            })
            .sum();
        (prefix, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binds_single_placeholder() {
        let template = UriTemplate::parse("greeting://{name}").unwrap();
        let bound = template.matches("greeting://Alice").unwrap();
        assert_eq!(bound.get("name").map(String::as_str), Some("Alice"));
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn test_binds_values_with_spaces() {
        let template = UriTemplate::parse("greeting://{name}").unwrap();
        let bound = template.matches("greeting://Remote Client").unwrap();
        assert_eq!(bound["name"], "Remote Client");
    }

    #[test]
    fn test_multiple_placeholders_and_trailing_literal() {
        let template = UriTemplate::parse("repo://{owner}/{repo}/readme").unwrap();
        let bound = template.matches("repo://octo/hello/readme").unwrap();
        assert_eq!(bound["owner"], "octo");
        assert_eq!(bound["repo"], "hello");
        assert!(template.matches("repo://octo/hello/license").is_none());
        assert_eq!(template.variables().collect::<Vec<_>>(), vec!["owner", "repo"]);
    }

    #[test]
    fn test_rejects_empty_and_slashed_values() {
        let template = UriTemplate::parse("greeting://{name}").unwrap();
        assert!(template.matches("greeting://").is_none());
        assert!(template.matches("greeting://a/b").is_none());
        assert!(template.matches("other://Alice").is_none());
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "x://{}",
            "x://{a",
            "x://a}",
            "x://{a}{b}",
            "x://{a}/{a}",
            "x://{a-b}",
        ] {
            assert!(
                matches!(UriTemplate::parse(bad), Err(Error::InvalidUriTemplate { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_specificity_prefers_longer_prefix() {
        let generic = UriTemplate::parse("docs://{path}").unwrap();
        let specific = UriTemplate::parse("docs://guides/{path}").unwrap();
        assert!(specific.specificity() > generic.specificity());
    }
}
