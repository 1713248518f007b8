//! `$env{NAME}` references in config text.
//!
//! References are resolved only in YAML content. Comments are copied through
//! untouched, so a commented-out section may mention variables that are not set.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use thiserror::Error;

/// Names referenced by the config but missing from the environment, sorted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_unset(.0))]
pub struct UnsetEnvVars(pub Vec<String>);

fn describe_unset(names: &[String]) -> String {
    match names {
        [name] => format!(
            "environment variable {0} is not set (referenced as $env{{{0}}}); \
             export it or replace the reference with a literal value",
            name
        ),
        _ => format!(
            "environment variables are not set: {}; \
             export them or replace the references with literal values",
            names.join(", ")
        ),
    }
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("constant pattern is valid")
    })
}

/// Substitute every `$env{NAME}` outside comments from the process environment.
pub fn expand_env_refs(yaml: &str) -> Result<String, UnsetEnvVars> {
    expand_with(yaml, |name| std::env::var(name).ok())
}

pub(crate) fn expand_with<F>(yaml: &str, lookup: F) -> Result<String, UnsetEnvVars>
where
    F: Fn(&str) -> Option<String>,
{
    let mut expanded = String::with_capacity(yaml.len());
    let mut unset = BTreeSet::new();

    for line in yaml.split_inclusive('\n') {
        let (content, comment) = line.split_at(comment_start(line).unwrap_or(line.len()));

        let mut copied = 0;
        for caps in env_reference().captures_iter(content) {
            let (Some(reference), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            expanded.push_str(&content[copied..reference.start()]);
            match lookup(name.as_str()) {
                Some(value) => expanded.push_str(&value),
                None => {
                    unset.insert(name.as_str().to_string());
                    expanded.push_str(reference.as_str());
                }
            }
            copied = reference.end();
        }
        expanded.push_str(&content[copied..]);
        expanded.push_str(comment);
    }

    if unset.is_empty() {
        Ok(expanded)
    } else {
        Err(UnsetEnvVars(unset.into_iter().collect()))
    }
}

/// Byte offset of the `#` opening a YAML comment on this line, if any.
///
/// A comment starts at a `#` at the beginning of the line or after
/// whitespace, outside single- and double-quoted scalars.
fn comment_start(line: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut after_blank = true;

    for (i, c) in line.char_indices() {
        match quote {
            Some('"') if escaped => escaped = false,
            Some('"') if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '#' && after_blank => return Some(i),
            None if (c == '"' || c == '\'') && after_blank => quote = Some(c),
            None => {}
        }
        after_blank = c.is_whitespace();
    }
    None
}
