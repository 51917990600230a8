//! Splitting a migration file into its up and down blocks.
//!
//! ```text
//! -- migrate:up [option:value ...]
//! <SQL statements>
//! -- migrate:down [option:value ...]
//! <SQL statements>
//! ```
//!
//! Directive lines are case-sensitive and must start at column 0. Each block runs from its
//! directive line to the start of the other directive (or end of file), whichever order they
//! appear in. The directive line itself is a SQL comment and stays part of the block contents.

use crate::error::Error;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static UP_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--[ \t]*migrate:up(?:[ \t]+[^\r\n]*)?\r?$").expect("valid up directive regex")
});

static DOWN_DIRECTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--[ \t]*migrate:down(?:[ \t]+[^\r\n]*)?\r?$")
        .expect("valid down directive regex")
});

static DIRECTIVE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--[ \t]*migrate:(?:up|down)").expect("valid directive prefix regex")
});

/// Options parsed from a directive line, e.g. `transaction:false`.
///
/// Keys are case-sensitive and unknown keys are kept but ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationOptions(HashMap<String, String>);

impl MigrationOptions {
    /// Whether the block runs inside a transaction. True unless `transaction` is exactly `false`.
    pub fn transaction(&self) -> bool {
        self.get("transaction") != Some("false")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MigrationOptions {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One direction (up or down) of a migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Migration {
    /// The SQL to execute, including the directive line that opened the block.
    pub contents: String,
    pub options: MigrationOptions,
}

impl Migration {
    /// Whether the block holds anything besides blank lines and `--` comments.
    pub fn has_statements(&self) -> bool {
        self.contents
            .lines()
            .any(|line| !is_empty_line(line) && !is_comment_line(line))
    }
}

/// Split a migration file into its `(up, down)` blocks.
///
/// Fails with [Error::MalformedMigration] if there is no `-- migrate:up` directive, or if any
/// statement appears before the first directive. A file without a down directive yields an
/// empty down [Migration].
pub fn parse_migration(contents: &str) -> Result<(Migration, Migration), Error> {
    let up_match = UP_DIRECTIVE_RE.find(contents).ok_or_else(|| {
        Error::MalformedMigration(
            "each migration must define an up block with '-- migrate:up'".to_string(),
        )
    })?;
    let down_match = DOWN_DIRECTIVE_RE.find(contents);

    let first_directive = match down_match {
        Some(down) => up_match.start().min(down.start()),
        None => up_match.start(),
    };
    if statements_precede(&contents[..first_directive]) {
        return Err(Error::MalformedMigration(
            "statements must be defined inside the '-- migrate:up' or '-- migrate:down' blocks"
                .to_string(),
        ));
    }

    let up_options = parse_options(up_match.as_str());
    let Some(down_match) = down_match else {
        let up = Migration {
            contents: contents[up_match.start()..].to_string(),
            options: up_options,
        };
        return Ok((up, Migration::default()));
    };

    let (up_end, down_end) = if up_match.start() < down_match.start() {
        (down_match.start(), contents.len())
    } else {
        (contents.len(), up_match.start())
    };

    let up = Migration {
        contents: contents[up_match.start()..up_end].to_string(),
        options: up_options,
    };
    let down = Migration {
        contents: contents[down_match.start()..down_end].to_string(),
        options: parse_options(down_match.as_str()),
    };
    Ok((up, down))
}

/// Parse the options on a directive line.
///
/// The `-- migrate:up` / `-- migrate:down` prefix is stripped if present, the rest is split on
/// whitespace, and each `key:value` token is kept. Tokens that are not exactly two
/// colon-separated parts are dropped.
pub fn parse_options(directive: &str) -> MigrationOptions {
    let line = directive.lines().next().unwrap_or_default();
    let rest = DIRECTIVE_PREFIX_RE.replace(line, "");

    rest.split_whitespace()
        .filter_map(|token| {
            let mut parts = token.split(':');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key, value)),
                _ => None,
            }
        })
        .collect()
}

fn statements_precede(preamble: &str) -> bool {
    preamble
        .split('\n')
        .any(|line| !is_empty_line(line) && !is_comment_line(line))
}

fn is_empty_line(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("--")
}
