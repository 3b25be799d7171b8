//! Minimal INI-style parser for pgvictoria's configuration files.
//!
//! No crate in this codebase's dependency stack parses INI (pgcat and
//! pg_doorman both hand-roll their own config formats too), so this stays
//! a small hand-written reader rather than pulling in an external crate.

use std::collections::HashMap;

use crate::error::{ConfigErrorKind, Error, Result};

/// A parsed INI document: ordered sections, each an ordered map of keys to
/// values. `[pgvictoria]` is the main section; every other section name is
/// a server name.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: Vec<(String, HashMap<String, String>)>,
}

impl IniDocument {
    /// Parse INI text. Lines are trimmed; `;` and `#` start a comment that
    /// runs to end of line. Values may be wrapped in matching `"…"` or
    /// `'…'` quotes, which are stripped.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: Vec<(String, HashMap<String, String>)> = Vec::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                sections.push((name.trim().to_string(), HashMap::new()));
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::config(
                    ConfigErrorKind::NotFoundOrParse,
                    format!("line {}: expected 'key = value', got {:?}", line_no + 1, line),
                ));
            };

            let key = key.trim().to_string();
            let value = unquote(value.trim()).to_string();

            let Some((_, map)) = sections.last_mut() else {
                return Err(Error::config(
                    ConfigErrorKind::NotFoundOrParse,
                    format!("line {}: key outside of any section", line_no + 1),
                ));
            };
            map.insert(key, value);
        }

        Ok(Self { sections })
    }

    /// Values of the `[pgvictoria]` section, if present.
    pub fn main_section(&self) -> Option<&HashMap<String, String>> {
        self.sections
            .iter()
            .find(|(name, _)| name == "pgvictoria")
            .map(|(_, map)| map)
    }

    /// All sections other than `[pgvictoria]`, in file order — one per
    /// configured server.
    pub fn server_sections(&self) -> impl Iterator<Item = (&str, &HashMap<String, String>)> {
        self.sections
            .iter()
            .filter(|(name, _)| name != "pgvictoria")
            .map(|(name, map)| (name.as_str(), map))
    }
}

fn strip_comment(line: &str) -> &str {
    for (i, c) in line.char_indices() {
        if c == ';' || c == '#' {
            return &line[..i];
        }
    }
    line
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Expand a leading `$HOME`/`${HOME}` reference in a "system key" value
/// (`unix_socket_dir`, `log_path`, `pidfile`) that is either unquoted or
/// was double-quoted in the source text.
pub fn expand_home(value: &str) -> String {
    if let Some(rest) = value.strip_prefix("$HOME") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}{rest}");
        }
    }
    if let Some(rest) = value.strip_prefix("${HOME}") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}{rest}");
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_main_and_server_sections() {
        let text = r#"
            [pgvictoria]
            host = *
            backlog = 128 ; default

            [primary]
            host = 10.0.0.1
            port = 5432
            user = "app_user"
        "#;

        let doc = IniDocument::parse(text).expect("parse");
        let main = doc.main_section().expect("main section");
        assert_eq!(main.get("host"), Some(&"*".to_string()));
        assert_eq!(main.get("backlog"), Some(&"128".to_string()));

        let servers: Vec<_> = doc.server_sections().collect();
        assert_eq!(servers.len(), 1);
        let (name, fields) = servers[0];
        assert_eq!(name, "primary");
        assert_eq!(fields.get("user"), Some(&"app_user".to_string()));
    }

    #[test]
    fn rejects_key_without_section() {
        let err = IniDocument::parse("host = *").unwrap_err();
        assert!(matches!(
            err,
            Error::Config {
                kind: ConfigErrorKind::NotFoundOrParse,
                ..
            }
        ));
    }

    #[test]
    fn strips_comments_and_quotes() {
        let doc = IniDocument::parse("[pgvictoria]\nlog_path = '/var/log/pgvictoria.log' # trailing\n")
            .expect("parse");
        assert_eq!(
            doc.main_section().unwrap().get("log_path"),
            Some(&"/var/log/pgvictoria.log".to_string())
        );
    }
}
