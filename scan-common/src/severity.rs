// SPDX-License-Identifier: Apache-2.0

//! The severity classifier: a pure, total function from a finding's
//! raw fields to one of five ordered levels.
//!
//! Patterns are plain data (`BUILTIN_PATTERNS`) rather than code, so the
//! cascade can be extended by callers without touching this module.

use std::{
    collections::HashMap,
    fmt,
    sync::OnceLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    // Ord is derived from declaration order: Info < Low < Medium < High < Critical.
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Cascade order, most severe first — the order the classifier scans in.
    pub const CASCADE: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        };
        f.write_str(s)
    }
}

/// Built-in regex cascade, ordered critical → info. Kept as data so a caller
/// can extend (never replace) any level via [`classify_with_extensions`].
const BUILTIN_PATTERNS: &[(Severity, &[&str])] = &[
    (
        Severity::Critical,
        &[
            r"\bcve-\d{4}-\d{4,7}\b.{0,32}\b(9\.\d|10\.0|critical|exploit|remote code execution|rce|unauthenticated)\b",
            r"\bexploit\b",
            r"\bremote code execution\b",
            r"\bprivilege escalation\b",
            r"\boutdated\b.{0,32}\bexploit\b",
        ],
    ),
    (
        Severity::High,
        &[
            r"\bcve-\d{4}-\d{4,7}\b",
            r"\bexploit\b",
            r"\banonymous\b",
            r"\bbackdoor\b",
            r"\bdefault credentials\b",
            r"\bunauthenticated\b",
            r"\bdeserialization\b",
            r"\bunsafe\b",
            r"\boutdated\b",
            r"\bpassword reuse\b",
        ],
    ),
    (
        Severity::Medium,
        &[
            r"\bvulnerab(le|ility|ilities)\b",
            r"\binsecure\b",
            r"\bopen\b",
            r"\bdeprecated\b",
            r"\bmisconfiguration\b",
        ],
    ),
    (
        Severity::Low,
        &[
            r"\bfiltered\b",
            r"\bopen\|filtered\b",
            r"\bno-response\b",
            r"\btimeout\b",
            r"\binfo\b",
            r"\bpotential\b",
            r"\bwaf\b",
            r"\bfirewall\b",
        ],
    ),
];

/// The fixed set of fields concatenated to build classifier input text.
const TEXT_FIELDS: &[&str] = &[
    "script_output",
    "output",
    "msg",
    "message",
    "description",
    "reason",
    "state",
    "detail",
];

fn compiled_builtins() -> &'static HashMap<Severity, Vec<Regex>> {
    static COMPILED: OnceLock<HashMap<Severity, Vec<Regex>>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        BUILTIN_PATTERNS
            .iter()
            .map(|(sev, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| Regex::new(&format!("(?i){p}")).expect("built-in pattern is valid"))
                    .collect();
                (*sev, compiled)
            })
            .collect()
    })
}

/// A minimal view of a finding entry, sufficient to classify it.
///
/// Plugins construct this from their own raw parsed record; the orchestrator
/// never needs the full finding shape to classify it.
pub trait ClassifiableEntry {
    fn field(&self, name: &str) -> Option<&str>;
}

impl ClassifiableEntry for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Classify an entry using only the built-in pattern cascade.
pub fn classify_severity(entry: &impl ClassifiableEntry) -> Severity {
    classify_with_extensions(entry, &HashMap::new())
}

/// Classify an entry, extending (never replacing) the built-in cascade with
/// caller-supplied patterns per level.
pub fn classify_with_extensions(
    entry: &impl ClassifiableEntry,
    extensions: &HashMap<Severity, Vec<String>>,
) -> Severity {
    let mut text = String::new();
    for field in TEXT_FIELDS {
        if let Some(value) = entry.field(field) {
            if !value.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&value.to_lowercase());
            }
        }
    }

    let state = entry.field("state").unwrap_or_default().to_lowercase();
    if state == "filtered" || state == "open|filtered" {
        return Severity::Low;
    }

    let builtins = compiled_builtins();
    for severity in Severity::CASCADE {
        if severity == Severity::Info {
            continue;
        }
        if let Some(patterns) = builtins.get(&severity) {
            if patterns.iter().any(|re| re.is_match(&text)) {
                return severity;
            }
        }
        if let Some(extra) = extensions.get(&severity) {
            if extra
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .any(|re| re.is_match(&text))
            {
                return severity;
            }
        }
    }

    if state == "open" {
        return Severity::Medium;
    }

    Severity::Info
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn entry(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cve_with_exploit_is_critical() {
        let e = entry(&[
            (
                "script_output",
                "Anonymous FTP login allowed. CVE-2021-12345 exploit.",
            ),
            ("state", "open"),
        ]);
        assert_eq!(classify_severity(&e), Severity::Critical);
    }

    #[test]
    fn filtered_state_short_circuits_to_low() {
        let e = entry(&[("state", "filtered"), ("script_output", "exploit rce")]);
        assert_eq!(classify_severity(&e), Severity::Low);
    }

    #[test]
    fn open_with_no_match_falls_back_to_medium() {
        let e = entry(&[("state", "open"), ("service_name", "ssh")]);
        assert_eq!(classify_severity(&e), Severity::Medium);
    }

    #[test]
    fn nothing_matches_and_not_open_is_info() {
        let e = entry(&[("state", "closed")]);
        assert_eq!(classify_severity(&e), Severity::Info);
    }

    #[test]
    fn earlier_cascade_level_wins_over_later() {
        // "exploit" matches both critical and high; critical must win.
        let e = entry(&[("msg", "exploit")]);
        assert_eq!(classify_severity(&e), Severity::Critical);
    }

    #[test]
    fn classification_is_deterministic() {
        let e = entry(&[("msg", "insecure deprecated service")]);
        let first = classify_severity(&e);
        let second = classify_severity(&e);
        assert_eq!(first, second);
    }

    #[test]
    fn extensions_add_without_replacing_builtins() {
        let mut ext = Map::new();
        ext.insert(Severity::High, vec![r"\bsuper-custom-indicator\b".to_string()]);
        let e = entry(&[("msg", "super-custom-indicator present")]);
        assert_eq!(classify_with_extensions(&e, &ext), Severity::High);

        // Built-ins still apply alongside the extension.
        let e2 = entry(&[("msg", "exploit")]);
        assert_eq!(classify_with_extensions(&e2, &ext), Severity::Critical);
    }
}
