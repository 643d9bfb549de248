//! Text canonicalization shared by the normalizer, deduplicator and scorer.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_BLOCK_TAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*(?:br|/p|/div|/li|/h[1-6]|/tr)\s*/?\s*>").unwrap());

static RE_SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<\s*(script|style)[^>]*>.*?<\s*/\s*(?:script|style)\s*>").unwrap());

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static RE_LOCATION_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]").unwrap());

static RE_COMPANY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s,]+(?:inc|incorporated|llc|l\.l\.c|ltd|limited|gmbh|corp|corporation|co|plc|s\.a|sa|ag|bv|pty)\.?$")
        .unwrap()
});

/// Company aliases applied after suffix stripping
const COMPANY_SYNONYMS: &[(&str, &str)] = &[
    ("alphabet", "google"),
    ("google llc", "google"),
    ("meta platforms", "meta"),
    ("facebook", "meta"),
    ("amazon web services", "amazon"),
    ("aws", "amazon"),
    ("microsoft corporation", "microsoft"),
    ("international business machines", "ibm"),
];

const REMOTE_MARKERS: &[&str] = &["remote", "anywhere", "worldwide", "work from home", "wfh"];

/// Remove HTML markup and decode the entities job boards commonly emit
pub fn strip_markup(input: &str) -> String {
    let without_scripts = RE_SCRIPT_STYLE.replace_all(input, " ");
    let with_breaks = RE_BLOCK_TAGS.replace_all(&without_scripts, "\n");
    let without_tags = RE_TAGS.replace_all(&with_breaks, " ");

    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// Collapse runs of whitespace into a single space and trim
pub fn collapse_whitespace(input: &str) -> String {
    RE_WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

/// Lowercase, punctuation-free location; remote-ish strings collapse to `remote`
pub fn canonicalize_location(input: &str) -> String {
    let lowered = input.to_lowercase();
    let cleaned = collapse_whitespace(&RE_LOCATION_PUNCT.replace_all(&lowered, " "));

    if REMOTE_MARKERS.iter().any(|m| cleaned == *m) {
        return "remote".to_string();
    }
    cleaned
}

/// Whether a location string advertises remote work
pub fn is_remote_location(input: &str) -> bool {
    let lowered = input.to_lowercase();
    REMOTE_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Canonical company key: lowercase, legal suffixes removed, synonyms applied
pub fn canonicalize_company(input: &str) -> String {
    let mut name = collapse_whitespace(&input.to_lowercase());

    // Suffixes can stack ("Acme Holdings Co., Ltd.")
    loop {
        let stripped = RE_COMPANY_SUFFIX.replace(&name, "").trim().to_string();
        if stripped == name || stripped.is_empty() {
            break;
        }
        name = stripped;
    }

    let name = name.trim_end_matches([',', '.']).trim().to_string();

    COMPANY_SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(name)
}

/// Lowercase word tokens; `+`, `#` and `.` inside words survive so `c++`, `c#` and `node.js` match
pub fn tokenize(input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#' || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word phrase containment over token sequences
pub fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;

    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_entities() {
        let html = "<p>Build <b>fast</b>&nbsp;services</p><script>alert(1)</script><ul><li>Go</li></ul>";
        let text = collapse_whitespace(&strip_markup(html));
        assert_eq!(text, "Build fast services Go");
    }

    #[test]
    fn canonicalizes_locations() {
        assert_eq!(canonicalize_location("  Berlin,  Germany "), "berlin germany");
        assert_eq!(canonicalize_location("REMOTE"), "remote");
        assert_eq!(canonicalize_location("Anywhere"), "remote");
        assert!(is_remote_location("Remote (US only)"));
    }

    #[test]
    fn canonicalizes_companies() {
        assert_eq!(canonicalize_company("Acme, Inc."), "acme");
        assert_eq!(canonicalize_company("Acme Holdings Co., Ltd."), "acme holdings");
        assert_eq!(canonicalize_company("Meta Platforms, Inc."), "meta");
        assert_eq!(canonicalize_company("Google LLC"), "google");
    }

    #[test]
    fn tokenizes_programming_languages() {
        let tokens = tokenize("Senior C++/C# engineer, Node.js.");
        assert_eq!(tokens, vec!["senior", "c++", "c#", "engineer", "node.js"]);
    }

    #[test]
    fn phrase_matching_is_whole_word() {
        let hay = tokenize("We are going to use machine learning");
        assert!(contains_phrase(&hay, &tokenize("machine learning")));
        assert!(!contains_phrase(&hay, &tokenize("go")));
    }
}
