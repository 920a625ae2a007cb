//! Variables and Token Substitution
//!
//! Placeholders are written `${name}`. Substitution is a single left-to-right
//! pass: replaced text is never scanned again, and placeholders without a
//! value are emitted unchanged.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::engine::EngineError;

const TOKEN_OPEN: &str = "${";
const TOKEN_CLOSE: char = '}';

/// A named value usable as `${name}` inside slide content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn value_as_base64(&self) -> String {
        encode_base64(&self.value)
    }

    pub fn from_base64(name: impl Into<String>, encoded: &str) -> Result<Self, EngineError> {
        Ok(Self::new(name, decode_base64(encoded)?))
    }
}

pub fn encode_base64(value: &str) -> String {
    BASE64_STANDARD.encode(value.as_bytes())
}

pub fn decode_base64(encoded: &str) -> Result<String, EngineError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| EngineError::MalformedConfiguration(format!("Invalid base64 value: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| EngineError::MalformedConfiguration(format!("Invalid UTF-8 value: {}", e)))
}

/// Set semantics by name over an ordered list of variables.
pub trait VariableSet {
    fn variable(&self, name: &str) -> Option<&Variable>;

    /// Replaces the value of an existing variable or appends a new one.
    fn set_variable(&mut self, name: &str, value: &str);

    /// Adds every variable of `defaults` whose name is not defined yet.
    fn merge_missing(&mut self, defaults: &[Variable]);
}

impl VariableSet for Vec<Variable> {
    fn variable(&self, name: &str) -> Option<&Variable> {
        self.iter().find(|v| v.name == name)
    }

    fn set_variable(&mut self, name: &str, value: &str) {
        match self.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.push(Variable::new(name, value)),
        }
    }

    fn merge_missing(&mut self, defaults: &[Variable]) {
        for default in defaults {
            if self.variable(&default.name).is_none() {
                self.push(default.clone());
            }
        }
    }
}

/// Replaces every `${name}` token for which `resolve` returns a value.
pub fn render<'a, F>(source: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<Cow<'a, str>>,
{
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;

    while let Some(rel) = source[cursor..].find(TOKEN_OPEN) {
        let start = cursor + rel;
        out.push_str(&source[cursor..start]);

        let name_start = start + TOKEN_OPEN.len();
        let Some(close_rel) = source[name_start..].find(TOKEN_CLOSE) else {
            // Unterminated token, keep the rest verbatim
            out.push_str(&source[start..]);
            return out;
        };
        let end = name_start + close_rel;
        if let Some(inner) = source[name_start..end].rfind(TOKEN_OPEN) {
            // Only the innermost opening belongs to this token
            let inner_start = name_start + inner;
            out.push_str(&source[start..inner_start]);
            cursor = inner_start;
            continue;
        }
        let name = source[name_start..end].trim();

        match resolve(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&source[start..=end]),
        }
        cursor = end + TOKEN_CLOSE.len_utf8();
    }

    out.push_str(&source[cursor..]);
    out
}

/// Variable-free copy of `source`. Pure: neither input is modified.
pub fn substitute(source: &str, variables: &[Variable]) -> String {
    if source.is_empty() {
        return String::new();
    }
    render(source, |name| {
        variables
            .iter()
            .find(|v| v.name == name)
            .map(|v| Cow::Borrowed(v.value.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vec<Variable> {
        vec![
            Variable::new("author", "Ada"),
            Variable::new("company", "${author} & Co"),
        ]
    }

    #[test]
    fn test_known_tokens_replaced() {
        let html = "<h1>${author}</h1><p>${ author }</p>";
        assert_eq!(substitute(html, &vars()), "<h1>Ada</h1><p>Ada</p>");
    }

    #[test]
    fn test_unknown_tokens_left_literal() {
        assert_eq!(substitute("<p>${missing}</p>", &vars()), "<p>${missing}</p>");
    }

    #[test]
    fn test_empty_source_yields_empty() {
        assert_eq!(substitute("", &vars()), "");
    }

    #[test]
    fn test_replacement_not_rescanned() {
        assert_eq!(substitute("${company}", &vars()), "${author} & Co");
    }

    #[test]
    fn test_stray_opening_before_token() {
        let variables = vec![Variable::new("b", "B")];
        assert_eq!(substitute("${a ${b}", &variables), "${a B");
        assert_eq!(substitute("$${b}${${b}}", &variables), "$B${B}");
    }

    #[test]
    fn test_unterminated_token_kept() {
        assert_eq!(substitute("a ${author", &vars()), "a ${author");
    }

    #[test]
    fn test_substitute_is_pure() {
        let variables = vars();
        let before = variables.clone();
        let html = "<b>${author}</b> ${nope}";

        let first = substitute(html, &variables);
        let second = substitute(html, &variables);

        assert_eq!(first, second);
        assert_eq!(variables, before);
        assert_eq!(substitute(&first, &variables), first);
    }

    #[test]
    fn test_variable_set_semantics() {
        let mut set = vars();
        set.set_variable("author", "Grace");
        set.set_variable("year", "2024");
        assert_eq!(set.len(), 3);
        assert_eq!(set.variable("author").unwrap().value, "Grace");

        set.merge_missing(&[Variable::new("author", "ignored"), Variable::new("city", "Paris")]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.variable("author").unwrap().value, "Grace");
    }

    #[test]
    fn test_base64_multiline_value() {
        let variable = Variable::new("footer", "line one\nligne deux é");
        let decoded = Variable::from_base64("footer", &variable.value_as_base64()).unwrap();
        assert_eq!(decoded, variable);
        assert!(decode_base64("%%%").is_err());
    }
}
