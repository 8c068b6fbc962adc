//! Canonical lookup keys.
//!
//! A live request and a recorded one match when their non-debug query
//! parameters and their compacted JSON bodies are equal, whatever order the
//! parameters were written in.

use crate::error::Error;
use serde::de::IgnoredAny;
use std::fmt::{self, Display};
use url::form_urlencoded;

/// Reserved query parameter toggling diagnostics. It never takes part in matching.
pub const DEBUG_PARAMETER: &str = "debug";

/// Query parameters grouped by name, values kept in the order they were supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameterSet {
    parameters: Vec<(String, Vec<String>)>,
}

impl QueryParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw (percent-encoded) query string. A token without `=` is a
    /// bare flag; `name=` is a parameter with one empty value.
    pub fn parse(query: &str) -> Self {
        let mut parameters = Self::new();

        for token in query.split('&').filter(|token| !token.is_empty()) {
            let is_flag = !token.contains('=');

            if let Some((name, value)) = form_urlencoded::parse(token.as_bytes()).next() {
                if is_flag {
                    parameters.add_flag(name);
                } else {
                    parameters.add(name, value);
                }
            }
        }

        parameters
    }

    pub fn add<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) -> &mut Self {
        self.values_mut(name.into()).push(value.into());
        self
    }

    pub fn add_flag<N: Into<String>>(&mut self, name: N) -> &mut Self {
        let _ = self.values_mut(name.into());
        self
    }

    fn values_mut(&mut self, name: String) -> &mut Vec<String> {
        let position = match self.parameters.iter().position(|(n, _)| *n == name) {
            Some(position) => position,
            None => {
                self.parameters.push((name, Vec::new()));
                self.parameters.len() - 1
            }
        };

        &mut self.parameters[position].1
    }

    pub fn has_debug_marker(&self) -> bool {
        self.parameters
            .iter()
            .any(|(name, _)| name == DEBUG_PARAMETER)
    }

    pub fn is_empty(&self) -> bool {
        self.canonical_parameters().next().is_none()
    }

    fn canonical_parameters(&self) -> impl Iterator<Item = &(String, Vec<String>)> {
        self.parameters
            .iter()
            .filter(|(name, _)| name != DEBUG_PARAMETER)
    }

    /// `name=v1,v2` tokens (or a bare `name` for flags), debug marker removed,
    /// sorted and joined with `&`.
    pub fn canonical_fragment(&self) -> String {
        let mut tokens = self
            .canonical_parameters()
            .map(|(name, values)| {
                if values.is_empty() {
                    name.clone()
                } else {
                    format!("{}={}", name, values.join(","))
                }
            })
            .collect::<Vec<_>>();
        tokens.sort();

        tokens.join("&")
    }

    /// Percent-encoded query string carrying the same canonical parameters,
    /// suitable for appending to a URL.
    pub fn to_query_string(&self) -> String {
        let mut tokens = Vec::new();

        for (name, values) in self.canonical_parameters() {
            let name: String = form_urlencoded::byte_serialize(name.as_bytes()).collect();
            if values.is_empty() {
                tokens.push((name.clone(), name));
                continue;
            }

            let joined = values.join(",");
            let value: String = form_urlencoded::byte_serialize(joined.as_bytes()).collect();
            tokens.push((format!("{}={}", name, joined), format!("{}={}", name, value)));
        }
        tokens.sort();

        tokens
            .into_iter()
            .map(|(_, encoded)| encoded)
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Canonical fragment of a raw query string.
pub fn canonical_query(query: &str) -> String {
    QueryParameterSet::parse(query).canonical_fragment()
}

/// Removes insignificant whitespace from JSON text. Tokens, key order and
/// string contents are left untouched.
pub fn compact_json(text: &str) -> Result<String, Error> {
    serde_json::from_str::<IgnoredAny>(text).map_err(|e| Error::InvalidJson(e.to_string()))?;

    let mut compacted = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            compacted.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            ' ' | '\t' | '\n' | '\r' => {}
            '"' => {
                in_string = true;
                compacted.push(c);
            }
            _ => compacted.push(c),
        }
    }

    Ok(compacted)
}

/// Identity of a recorded interaction.
///
/// Both parts are kept apart so a query-only key never equals a body-only key,
/// even when their text would coincide once bracketed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    query: Option<String>,
    body: Option<String>,
}

impl CanonicalKey {
    /// Builds a key from an already canonical query fragment and a raw JSON body.
    pub fn new(fragment: &str, body: Option<&str>) -> Result<Self, Error> {
        let body = match body {
            Some(body) if !body.trim().is_empty() => Some(compact_json(body)?),
            _ => None,
        };

        Ok(Self::from_parts(fragment, body))
    }

    /// Builds a key from a canonical fragment and an already compacted body.
    pub fn from_parts<S: Into<String>>(fragment: S, compacted_body: Option<String>) -> Self {
        let fragment = fragment.into();

        Self {
            query: if fragment.is_empty() {
                None
            } else {
                Some(fragment)
            },
            body: compacted_body,
        }
    }

    pub fn query_fragment(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.body.is_none()
    }
}

impl Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(query) = &self.query {
            write!(f, "[{}]", query)?;
        }
        if let Some(body) = &self.body {
            write!(f, "{}", body)?;
        }

        Ok(())
    }
}
