use std::fmt;

/// Free-text report returned by the image description call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticResult(String);

impl DiagnosticResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiagnosticResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-text answer to one follow-up prompt. Shown once, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightResult(String);

impl InsightResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InsightResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
