//! Failure classification from command output.

use regex::Regex;

use crate::core::FailureClass;
use crate::{Error, Result};

/// Built-in rules, checked in order. The first match wins.
const BUILTIN_RULES: &[(FailureClass, &str)] = &[
    (FailureClass::Timeout, r"(?i)timed out|deadline exceeded"),
    (
        FailureClass::Resource,
        r"(?i)out of memory|no space left|cannot allocate|too many open files|resource temporarily unavailable",
    ),
    (
        FailureClass::Type,
        r"(?i)mismatched types|typeerror|type error|incompatible types|error\[E0308\]",
    ),
    (
        FailureClass::Syntax,
        r"(?i)syntaxerror|syntax error|parse error|unexpected token|expected .* found|unresolved import|missing import|cannot find (module|crate)|no module named|importerror",
    ),
    (
        FailureClass::Integration,
        r"(?i)connection refused|connection reset|econnrefused|host unreachable|service unavailable",
    ),
    (
        FailureClass::Test,
        r"(?i)test result: failed|assertionerror|assertion failed|tests? failed|panicked at",
    ),
];

struct Rule {
    class: FailureClass,
    pattern: Regex,
}

/// Ordered regex rules mapping output text to a [`FailureClass`].
pub struct ErrorClassifier {
    rules: Vec<Rule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(class, pattern)| {
                Regex::new(pattern).ok().map(|pattern| Rule {
                    class: *class,
                    pattern,
                })
            })
            .collect();
        Self { rules }
    }
}

impl ErrorClassifier {
    /// A classifier with no rules; everything is `other`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule checked before every existing one.
    pub fn with_rule(mut self, class: FailureClass, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Validation(format!("invalid classifier pattern: {}", e)))?;
        self.rules.insert(0, Rule { class, pattern });
        Ok(self)
    }

    pub fn classify(&self, output: &str) -> FailureClass {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(output))
            .map(|rule| rule.class)
            .unwrap_or(FailureClass::Other)
    }
}
