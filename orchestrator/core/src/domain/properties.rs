// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deployment properties and start-on-deploy flags.
//!
//! Properties are persisted as flat `key=value` text in the `.properties`
//! dialect: `#`/`!` comment lines, `=` or `:` separators, backslash escapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artifact-level start-on-deploy flag.
pub const START_ARTIFACT_ON_DEPLOYMENT: &str = "startArtifactOnDeployment";

/// Suffix of the per-component start-on-deploy flag (`<component>_startOnDeployment`).
pub const COMPONENT_START_SUFFIX: &str = "_startOnDeployment";

/// Flat string-keyed property set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentProperties(BTreeMap<String, String>);

impl DeploymentProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Boolean lookup where an absent or unparsable value means `default`.
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" => true,
            Some(v) if v == "false" => false,
            _ => default,
        }
    }

    pub fn set_flag(&mut self, key: impl Into<String>, value: bool) {
        self.insert(key, value.to_string());
    }

    /// Serialize to `.properties` text, one entry per line, sorted by key.
    pub fn to_properties_string(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.0 {
            out.push_str(&escape(key, true));
            out.push('=');
            out.push_str(&escape(value, false));
            out.push('\n');
        }
        out
    }

    /// Parse `.properties` text. Continuation lines are not supported; every
    /// logical entry occupies one physical line.
    pub fn parse(text: &str) -> Self {
        let mut map = BTreeMap::new();
        for raw in text.lines() {
            let line = raw.trim_start();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = split_entry(line);
            map.insert(unescape(&key), unescape(value.trim_start()));
        }
        Self(map)
    }
}

impl FromIterator<(String, String)> for DeploymentProperties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, &str); N]> for DeploymentProperties {
    fn from(entries: [(&str, &str); N]) -> Self {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

fn split_entry(line: &str) -> (String, &str) {
    let mut key = String::new();
    let mut chars = line.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '\\' => {
                key.push('\\');
                if let Some((_, escaped)) = chars.next() {
                    key.push(escaped);
                }
            }
            '=' | ':' => return (key, &line[idx + 1..]),
            c if c.is_whitespace() => {
                let rest = line[idx..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (key, rest);
            }
            c => key.push(c),
        }
    }
    (key, "")
}

fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (idx, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            // a leading space in a value would be read back as separator padding
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Start-on-deploy flags resolved from the persisted status properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFlags {
    pub artifact: bool,
    components: BTreeMap<String, bool>,
}

impl StartFlags {
    pub fn from_status(status: &DeploymentProperties) -> Self {
        let components = status
            .iter()
            .filter_map(|(key, _)| {
                key.strip_suffix(COMPONENT_START_SUFFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), status.flag(key, true)))
            })
            .collect();
        Self {
            artifact: status.flag(START_ARTIFACT_ON_DEPLOYMENT, true),
            components,
        }
    }

    /// Whether a named component should start with its artifact; absent means true.
    pub fn component(&self, name: &str) -> bool {
        self.components.get(name).copied().unwrap_or(true)
    }
}

impl Default for StartFlags {
    fn default() -> Self {
        Self {
            artifact: true,
            components: BTreeMap::new(),
        }
    }
}

pub fn component_flag_key(component: &str) -> String {
    format!("{}{}", component, COMPONENT_START_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_text_roundtrip_with_escapes() {
        let mut props = DeploymentProperties::new();
        props.insert("db.url", "jdbc:h2:mem");
        props.insert("odd key", "line1\nline2");
        props.insert("path", "C:\\tmp\\x=y");

        let text = props.to_properties_string();
        assert_eq!(DeploymentProperties::parse(&text), props);
    }

    #[test]
    fn test_values_keep_leading_spaces_and_special_characters() {
        let mut props = DeploymentProperties::new();
        props.insert("indented", "  indented");
        props.insert("separators", "a=b:c");
        props.insert("#hash", "#not a comment");
        props.insert("greeting", "grüße, 日本");
        props.insert("blank", " ");

        let text = props.to_properties_string();
        assert!(text.contains("indented=\\  indented\n"));
        let parsed = DeploymentProperties::parse(&text);
        assert_eq!(parsed, props);
        assert_eq!(parsed.get("indented"), Some("  indented"));
    }

    #[test]
    fn test_parse_comments_and_separators() {
        let text = "# comment\n! other\n\na=1\nb: 2\nc 3\n  d = four \n";
        let props = DeploymentProperties::parse(text);
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), Some("2"));
        assert_eq!(props.get("c"), Some("3"));
        assert_eq!(props.get("d"), Some("four "));
        assert_eq!(props.len(), 4);
    }

    #[test]
    fn test_start_flags_default_to_true() {
        let flags = StartFlags::from_status(&DeploymentProperties::new());
        assert!(flags.artifact);
        assert!(flags.component("anything"));

        let status = DeploymentProperties::from([
            (START_ARTIFACT_ON_DEPLOYMENT, "false"),
            ("ingest_startOnDeployment", "false"),
            ("publish_startOnDeployment", "true"),
        ]);
        let flags = StartFlags::from_status(&status);
        assert!(!flags.artifact);
        assert!(!flags.component("ingest"));
        assert!(flags.component("publish"));
    }

    #[test]
    fn test_unparsable_flag_uses_default() {
        let props = DeploymentProperties::from([(START_ARTIFACT_ON_DEPLOYMENT, "maybe")]);
        assert!(props.flag(START_ARTIFACT_ON_DEPLOYMENT, true));
        assert!(!props.flag(START_ARTIFACT_ON_DEPLOYMENT, false));
    }
}
