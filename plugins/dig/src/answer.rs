// SPDX-License-Identifier: Apache-2.0

//! Line-oriented parsing of `dig`'s default text output into records,
//! tracking which of the ANSWER/AUTHORITY/ADDITIONAL sections a line
//! belongs to as it's encountered.

use serde_json::{json, Value};

pub fn parse_dig_output(output: &str, default_section: &str) -> Vec<Value> {
    let mut section = default_section.to_string();
    let mut entries = Vec::new();

    for line in output.lines() {
        if line.starts_with(";; ANSWER SECTION:") {
            section = "answer".to_string();
            continue;
        }
        if line.starts_with(";; AUTHORITY SECTION:") {
            section = "authority".to_string();
            continue;
        }
        if line.starts_with(";; ADDITIONAL SECTION:") {
            section = "additional".to_string();
            continue;
        }
        if line.starts_with(';') || line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }
        let Ok(ttl) = parts[1].parse::<i64>() else { continue };
        entries.push(json!({
            "section": section,
            "name": parts[0],
            "ttl": ttl,
            "type": parts[3],
            "data": parts[4..].join(" "),
        }));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
;; ANSWER SECTION:
example.test.\t300\tIN\tA\t10.0.0.1
;; AUTHORITY SECTION:
example.test.\t300\tIN\tNS\tns1.example.test.
";

    #[test]
    fn tracks_section_transitions() {
        let entries = parse_dig_output(SAMPLE, "answer");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["section"], "answer");
        assert_eq!(entries[1]["section"], "authority");
    }

    #[test]
    fn comment_and_blank_lines_are_skipped() {
        let entries = parse_dig_output(";; a comment\n\n", "answer");
        assert!(entries.is_empty());
    }

    #[test]
    fn lines_with_too_few_fields_are_skipped() {
        let entries = parse_dig_output("short line\n", "answer");
        assert!(entries.is_empty());
    }
}
