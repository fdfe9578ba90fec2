// SPDX-License-Identifier: Apache-2.0

//! Reformat nmap's raw per-script output into labeled sections so a report
//! doesn't have to re-derive which lines are cert info, TLS ciphers, or
//! known CVEs from an undifferentiated blob.

use std::collections::{BTreeSet, HashMap};

pub fn format_script_output(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        return "-".to_string();
    }

    let mut seen = BTreeSet::new();
    let unique_lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "-")
        .filter(|l| seen.insert(*l))
        .collect();

    let mut sections = Vec::new();

    if unique_lines.iter().any(|l| l.contains("TLSv1.")) {
        let mut tls_lines = Vec::new();
        for line in &unique_lines {
            if line.contains("TLSv1.") {
                tls_lines.push(format!("\n{}", line.trim_end_matches(':')));
            } else if line.contains("TLS_") || line.contains("TLS_AKE_") {
                tls_lines.push(format!("- {line}"));
            }
        }
        if !tls_lines.is_empty() {
            sections.push(format!("[TLS Cipher Support]\n{}", tls_lines.join("\n")));
        }
    }

    if unique_lines.iter().any(|l| l.contains("Subject:") || l.contains("Valid:")) {
        let mut cert_block = vec!["[Cert Info]".to_string()];
        for key in [
            "Subject:",
            "Subject Alternative Name",
            "Issuer:",
            "Public Key",
            "Signature Algorithm",
            "Not valid",
            "MD5:",
            "SHA-1:",
        ] {
            cert_block.extend(unique_lines.iter().filter(|l| l.contains(key)).map(|l| l.to_string()));
        }
        sections.push(cert_block.join("\n"));
    }

    if unique_lines.iter().any(|l| l.contains("FTP") || l.contains("Anonymous FTP login allowed")) {
        let mut block = vec!["[FTP Info]".to_string()];
        block.extend(unique_lines.iter().filter(|l| l.contains("FTP")).map(|l| l.to_string()));
        sections.push(block.join("\n"));
    }

    if unique_lines.iter().any(|l| l.contains("SSH")) {
        let mut block = vec!["[SSH Info]".to_string()];
        block.extend(unique_lines.iter().filter(|l| l.contains("SSH")).map(|l| l.to_string()));
        sections.push(block.join("\n"));
    }

    if unique_lines.iter().any(|l| l.contains("/nice ports") || l.contains("FourOhFourRequest")) {
        let mut block = vec!["[HTTP Response Patterns]".to_string()];
        block.extend(
            unique_lines
                .iter()
                .filter(|l| l.contains("FourOhFourRequest") || l.contains("Request") || l.contains("OPTIONS"))
                .map(|l| format!("- {l}")),
        );
        sections.push(block.join("\n"));
    }

    if unique_lines.iter().any(|l| l.contains("CVE-") || l.to_lowercase().contains("vulnerab")) {
        let vuln_lines: Vec<&str> = unique_lines
            .iter()
            .filter(|l| l.contains("CVE-") || l.to_lowercase().contains("vulnerab"))
            .copied()
            .collect();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for line in &vuln_lines {
            for word in line.split_whitespace() {
                if word.starts_with("CVE-") {
                    *counts.entry(word).or_insert(0) += 1;
                }
            }
        }
        let mut counted_cves: Vec<String> = counts
            .into_iter()
            .map(|(cve, count)| if count > 1 { format!("{cve} (x{count})") } else { cve.to_string() })
            .collect();
        counted_cves.sort_unstable();

        let mut body = counted_cves;
        body.extend(vuln_lines.iter().map(|l| l.to_string()));
        sections.push(format!("[Vulnerabilities]\n{}", body.join("\n")));
    }

    if sections.is_empty() {
        unique_lines.join("\n")
    } else {
        sections.join("\n\n").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_yields_dash() {
        assert_eq!(format_script_output(""), "-");
        assert_eq!(format_script_output("-"), "-");
    }

    #[test]
    fn extracts_cve_section_with_counts() {
        let raw = "CVE-2021-1234 found\nCVE-2021-1234 found again\nvulnerable to something";
        let out = format_script_output(raw);
        assert!(out.contains("[Vulnerabilities]"));
        assert!(out.contains("CVE-2021-1234 (x2)"));
    }

    #[test]
    fn no_recognized_section_falls_back_to_joined_lines() {
        let raw = "just some output\nanother line";
        let out = format_script_output(raw);
        assert_eq!(out, "just some output\nanother line");
    }

    #[test]
    fn duplicate_lines_are_deduplicated() {
        let raw = "SSH banner\nSSH banner\nSSH banner";
        let out = format_script_output(raw);
        assert_eq!(out.matches("SSH banner").count(), 1);
    }
}
