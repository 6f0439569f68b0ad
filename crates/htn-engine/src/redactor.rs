// Copyright 2026 Covenant Labs

//! PII redaction.
//!
//! A pure function over strings: no I/O, no errors, best-effort output.
//! Patterns are compiled once and applied longest-pattern-first, then
//! lexicographic by placeholder, so two [`Redactor`]s built from the same
//! pattern set always redact the same input byte-for-byte.

use regex::Regex;

/// One named pattern: a compiled regex and the placeholder category it is
/// replaced with, e.g. `[EMAIL_REDACTED]`.
#[derive(Clone)]
struct Pattern {
    regex: Regex,
    placeholder: &'static str,
    /// Length of the *source* pattern text, used to break ties so the most
    /// specific pattern wins when two patterns could both match a span.
    specificity: usize,
}

/// Idempotent, deterministic PII redactor.
///
/// ```
/// use htn_engine::redactor::Redactor;
/// let r = Redactor::with_defaults();
/// let out = r.redact("contact me at jane@example.com");
/// assert_eq!(out, "contact me at [EMAIL_REDACTED]");
/// assert_eq!(r.redact(&out), out, "redaction must be idempotent");
/// ```
#[derive(Clone)]
pub struct Redactor {
    patterns: Vec<Pattern>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Redactor {
    /// Build a redactor from additional literal names (e.g. policy-declared
    /// staff names) plus raw regex strings, layered on top of the built-in
    /// categories. Malformed regexes are skipped rather than erroring,
    /// matching the "no errors, best-effort" contract.
    pub fn new(extra_names: &[String], extra_patterns: &[String]) -> Self {
        let mut patterns = Self::builtin_patterns();

        for name in extra_names {
            let escaped = regex::escape(name);
            if let Ok(regex) = Regex::new(&format!(r"\b{escaped}\b")) {
                patterns.push(Pattern {
                    specificity: name.len(),
                    regex,
                    placeholder: "[NAME_REDACTED]",
                });
            }
        }
        for raw in extra_patterns {
            if let Ok(regex) = Regex::new(raw) {
                patterns.push(Pattern {
                    specificity: raw.len(),
                    regex,
                    placeholder: "[REDACTED]",
                });
            }
        }

        Self::order(&mut patterns);
        Self { patterns }
    }

    /// A redactor with only the built-in categories (email, phone, card-like
    /// numbers, SSN-shape) and no policy-declared names.
    pub fn with_defaults() -> Self {
        let mut patterns = Self::builtin_patterns();
        Self::order(&mut patterns);
        Self { patterns }
    }

    fn order(patterns: &mut [Pattern]) {
        patterns.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then_with(|| a.placeholder.cmp(b.placeholder))
        });
    }

    fn builtin_patterns() -> Vec<Pattern> {
        let defs: &[(&str, &str)] = &[
            (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", "[EMAIL_REDACTED]"),
            (r"\b\d{3}-\d{2}-\d{4}\b", "[SSN_REDACTED]"),
            (r"\b(?:\d[ -]*?){13,19}\b", "[CARD_REDACTED]"),
            (r"\+?\d{1,3}?[-. (]*\d{3}[-. )]*\d{3}[-. ]*\d{4}\b", "[PHONE_REDACTED]"),
            (r"(?i)\bpassword\s*(?:is|[:=])\s*\S+", "[SECRET_REDACTED]"),
        ];
        defs.iter()
            .filter_map(|(src, placeholder)| {
                Regex::new(src).ok().map(|regex| Pattern {
                    regex,
                    placeholder,
                    specificity: src.len(),
                })
            })
            .collect()
    }

    /// Redact all configured patterns out of `input`, replacing each match
    /// with its category placeholder. O(n·k) for input length n and k
    /// patterns. Running this on its own output is a no-op.
    pub fn redact(&self, input: &str) -> String {
        let mut out = input.to_string();
        for pattern in &self.patterns {
            if pattern.regex.is_match(&out) {
                out = pattern.regex.replace_all(&out, pattern.placeholder).into_owned();
            }
        }
        out
    }

    /// True if `text` contains no substring matching any configured
    /// pattern — the property the suite checks.
    pub fn is_clean(&self, text: &str) -> bool {
        self.patterns.iter().all(|p| !p.regex.is_match(text))
    }
}
