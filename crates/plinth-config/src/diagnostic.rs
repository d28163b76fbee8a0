// SPDX-FileCopyrightText: 2026 Plinth Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment failures into miette reports that point into `plinth.toml`.
//!
//! Suggestions come from [`SECTION_KEYS`], so a misspelt key is matched
//! against the keys of its own table first and then against every other
//! table, which catches settings placed under the wrong header.

#![allow(unused_assignments)] // miette's Diagnostic derive trips this lint on struct fields

use std::path::Path;

use figment::error::Kind;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use thiserror::Error;

use crate::model::{self, SECTION_KEYS};

/// Jaro-Winkler score a candidate must beat to be offered.
const SIMILARITY_FLOOR: f64 = 0.8;

/// A configuration error with enough context to render a report.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("`[{section}]` is not a Plinth configuration section")]
    #[diagnostic(code(plinth::config::unknown_section), help("{hint}"))]
    UnknownSection {
        section: String,
        suggestion: Option<String>,
        hint: String,
        #[label("unknown section")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` is not a setting of `[{table}]`")]
    #[diagnostic(code(plinth::config::unknown_key), help("{hint}"))]
    UnknownKey {
        table: String,
        key: String,
        suggestion: Option<String>,
        hint: String,
        #[label("not recognized here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` has the wrong type: found {found}, expected {expected}")]
    #[diagnostic(code(plinth::config::invalid_type))]
    InvalidType {
        key: String,
        found: String,
        expected: String,
        #[label("wrong type")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    #[error("`{key}` is required")]
    #[diagnostic(code(plinth::config::missing_key), help("{hint}"))]
    MissingKey { key: String, hint: String },

    #[error("invalid setting: {message}")]
    #[diagnostic(code(plinth::config::validation))]
    Validation { message: String },

    /// The file could not be read or is not TOML.
    #[error("cannot load configuration: {0}")]
    #[diagnostic(code(plinth::config::unreadable))]
    Unreadable(String),
}

/// The text of one configuration file, kept for span lookup.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub name: String,
    pub text: String,
}

impl ConfigSource {
    /// Reads `path`; a missing or unreadable file yields `None`.
    pub fn read(path: &Path) -> Option<Self> {
        std::fs::read_to_string(path).ok().map(|text| Self {
            name: path.display().to_string(),
            text,
        })
    }

    pub fn inline(text: &str) -> Self {
        Self {
            name: "<inline>".to_string(),
            text: text.to_string(),
        }
    }

    fn named(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, self.text.clone())
    }
}

/// Converts every error carried by `err` into a diagnostic.
pub fn from_figment(err: figment::Error, sources: &[ConfigSource]) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| {
            let source = source_of(&error, sources);
            let table = table_path(&error.path);
            match &error.kind {
                Kind::UnknownField(field, _) if table.is_empty() => {
                    unknown_section(field, source)
                }
                Kind::UnknownField(field, expected) => {
                    unknown_key(&table, field, expected, source)
                }
                Kind::MissingField(field) => missing_key(&table, field),
                Kind::InvalidType(found, expected) => {
                    let (parent, key) = split_last(&error.path);
                    let located = source.and_then(|s| {
                        locate_key(&s.text, &table_path(parent), key).map(|span| (span, s.named()))
                    });
                    let (span, src) = located.unzip();
                    ConfigError::InvalidType {
                        key: error.path.join("."),
                        found: found.to_string(),
                        expected: expected.to_string(),
                        span,
                        src,
                    }
                }
                _ => ConfigError::Unreadable(error.to_string()),
            }
        })
        .collect()
}

fn unknown_section(section: &str, source: Option<&ConfigSource>) -> ConfigError {
    let suggestion = closest(section, model::sections());
    let hint = match &suggestion {
        Some(s) => format!("did you mean `[{s}]`?"),
        None => format!(
            "sections are: {}",
            model::sections().collect::<Vec<_>>().join(", ")
        ),
    };
    let located = source.and_then(|s| locate_table(&s.text, section).map(|span| (span, s.named())));
    let (span, src) = located.unzip();
    ConfigError::UnknownSection {
        section: section.to_string(),
        suggestion,
        hint,
        span,
        src,
    }
}

fn unknown_key(
    table: &str,
    key: &str,
    expected: &[&str],
    source: Option<&ConfigSource>,
) -> ConfigError {
    let local = model::keys_of(table).unwrap_or(expected);
    let suggestion = closest(key, local.iter().copied());
    let hint = match &suggestion {
        Some(s) => format!("did you mean `{s}`?"),
        None => match home_of(key, table) {
            Some(other) => format!("`{key}` belongs under `[{other}]`"),
            None => format!("`[{table}]` accepts: {}", local.join(", ")),
        },
    };
    let located = source.and_then(|s| locate_key(&s.text, table, key).map(|span| (span, s.named())));
    let (span, src) = located.unzip();
    ConfigError::UnknownKey {
        table: table.to_string(),
        key: key.to_string(),
        suggestion,
        hint,
        span,
        src,
    }
}

fn missing_key(table: &str, field: &str) -> ConfigError {
    let hint = if table == "auth.tokens" {
        "every `[[auth.tokens]]` entry needs both `token` and `actor_id`".to_string()
    } else if table.is_empty() {
        format!("add `{field} = ...` at the top of plinth.toml")
    } else {
        format!("add `{field} = ...` under `[{table}]`")
    };
    let key = if table.is_empty() {
        field.to_string()
    } else {
        format!("{table}.{field}")
    };
    ConfigError::MissingKey { key, hint }
}

/// The other table that owns `key`, if exactly that key exists elsewhere.
fn home_of(key: &str, table: &str) -> Option<&'static str> {
    SECTION_KEYS
        .iter()
        .find(|(name, keys)| *name != table && keys.contains(&key))
        .map(|(name, _)| *name)
}

fn closest<'a>(word: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    candidates
        .map(|c| (strsim::jaro_winkler(word, c), c))
        .filter(|(score, _)| *score > SIMILARITY_FLOOR)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.to_string())
}

/// Dotted table path with array indices dropped: `auth.0.tokens` style paths
/// from figment become `auth.tokens`.
fn table_path(path: &[String]) -> String {
    path.iter()
        .filter(|segment| segment.parse::<usize>().is_err())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(".")
}

fn split_last(path: &[String]) -> (&[String], &str) {
    match path.split_last() {
        Some((last, parent)) => (parent, last.as_str()),
        None => (&[], ""),
    }
}

fn source_of<'a>(error: &figment::Error, sources: &'a [ConfigSource]) -> Option<&'a ConfigSource> {
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });
    // Figment resolves relative paths, so a lone source is the fallback.
    let only = match sources {
        [only] => Some(only),
        _ => None,
    };
    file.and_then(|name| sources.iter().find(|s| s.name == name))
        .or(only)
}

/// Table header name of a line such as `[server]` or `[[auth.tokens]]`.
fn header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?;
    let inner = inner.strip_prefix('[').unwrap_or(inner);
    let end = inner.find(']')?;
    Some(inner[..end].trim())
}

/// Span of `key` assigned inside `table` (`""` is the root table).
pub fn locate_key(text: &str, table: &str, key: &str) -> Option<SourceSpan> {
    let mut current = "";
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if let Some(name) = header(trimmed) {
            current = name;
        } else if current == table
            && let Some((lhs, _)) = trimmed.split_once('=')
            && lhs.trim_end() == key
        {
            let start = offset + (line.len() - trimmed.len());
            return Some(SourceSpan::new(start.into(), key.len()));
        }
        offset += line.len();
    }
    None
}

/// Span of the name inside the `[table]` header.
pub fn locate_table(text: &str, table: &str) -> Option<SourceSpan> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if header(trimmed) == Some(table) {
            let start = offset + line.find(table)?;
            return Some(SourceSpan::new(start.into(), table.len()));
        }
        offset += line.len();
    }
    None
}

/// Renders `errors` as one plain-text report.
pub fn render_report(errors: &[ConfigError]) -> String {
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
    let mut out = String::new();
    for error in errors {
        if handler.render_report(&mut out, error as &dyn Diagnostic).is_err() {
            out.push_str(&format!("error: {error}\n"));
        }
    }
    out
}

/// Prints every error to stderr.
pub fn render_errors(errors: &[ConfigError]) {
    eprint!("{}", render_report(errors));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misspelt_key_is_matched_within_its_table() {
        let ConfigError::UnknownKey { suggestion, .. } = unknown_key("server", "prot", &[], None)
        else {
            panic!("expected UnknownKey");
        };
        assert_eq!(suggestion.as_deref(), Some("port"));
    }

    #[test]
    fn key_under_the_wrong_header_names_its_home() {
        let err = unknown_key("server", "interval_secs", &[], None);
        let ConfigError::UnknownKey { suggestion, hint, .. } = &err else {
            panic!("expected UnknownKey");
        };
        assert!(suggestion.is_none());
        assert_eq!(hint, "`interval_secs` belongs under `[sync]`");
    }

    #[test]
    fn unrelated_key_lists_the_table() {
        let ConfigError::UnknownKey { hint, .. } = unknown_key("logging", "zzzz", &[], None) else {
            panic!("expected UnknownKey");
        };
        assert_eq!(hint, "`[logging]` accepts: level");
    }

    #[test]
    fn misspelt_section_is_suggested() {
        let ConfigError::UnknownSection { suggestion, .. } = unknown_section("servr", None) else {
            panic!("expected UnknownSection");
        };
        assert_eq!(suggestion.as_deref(), Some("server"));
    }

    #[test]
    fn token_entries_explain_required_fields() {
        let ConfigError::MissingKey { key, hint } = missing_key("auth.tokens", "actor_id") else {
            panic!("expected MissingKey");
        };
        assert_eq!(key, "auth.tokens.actor_id");
        assert!(hint.contains("[[auth.tokens]]"));
    }

    #[test]
    fn array_indices_are_dropped_from_table_paths() {
        let path = vec!["auth".to_string(), "tokens".to_string(), "0".to_string()];
        assert_eq!(table_path(&path), "auth.tokens");
    }

    #[test]
    fn keys_are_located_only_inside_their_table() {
        let text = "[sync]\nport = 1\n[server]\r\nhost = \"x\"\r\nport = 2\r\n";
        let span = locate_key(text, "server", "port").unwrap();
        assert_eq!(&text[span.offset()..span.offset() + span.len()], "port");
        assert!(span.offset() > text.find("[server]").unwrap());
        assert!(locate_key(text, "logging", "port").is_none());
    }

    #[test]
    fn array_table_headers_are_recognized() {
        let text = "[[auth.tokens]]\ntokn = \"t\"\n";
        let span = locate_key(text, "auth.tokens", "tokn").unwrap();
        assert_eq!(span.offset(), text.find("tokn").unwrap());
        let span = locate_table("[servr]\n", "servr").unwrap();
        assert_eq!(span.offset(), 1);
    }
}
