/// Removes known-benign lines from sandbox stderr before it reaches the operator.
#[derive(Debug, Clone)]
pub struct DiagnosticFilter {
    suppress_prefixes: Vec<String>,
}

impl DiagnosticFilter {
    pub fn new(suppress_prefixes: Vec<String>) -> Self {
        Self { suppress_prefixes }
    }

    pub fn is_suppressed(&self, line: &str) -> bool {
        self.suppress_prefixes.iter().any(|p| line.starts_with(p.as_str()))
    }

    /// Lines worth showing, in order. Blank lines are dropped too.
    pub fn filter(&self, stderr: &str) -> Vec<String> {
        stderr
            .lines()
            .filter(|line| !line.trim().is_empty() && !self.is_suppressed(line))
            .map(str::to_string)
            .collect()
    }
}

impl Default for DiagnosticFilter {
    fn default() -> Self {
        Self::new(vec!["WARNING:".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_warning_lines() {
        let filter = DiagnosticFilter::default();
        let stderr = "WARNING: pip is outdated\nTraceback (most recent call last):\n\nWARNING: again\n  KeyError: 'x'\n";
        assert_eq!(
            filter.filter(stderr),
            vec!["Traceback (most recent call last):", "  KeyError: 'x'"]
        );
    }

    #[test]
    fn prefix_must_start_the_line() {
        let filter = DiagnosticFilter::default();
        assert!(!filter.is_suppressed("  WARNING: indented"));
        assert!(!filter.is_suppressed("warning: lowercase"));
        assert!(filter.is_suppressed("WARNING:"));
    }

    #[test]
    fn no_prefixes_keeps_everything() {
        let filter = DiagnosticFilter::new(Vec::new());
        assert_eq!(filter.filter("WARNING: kept\n"), vec!["WARNING: kept"]);
    }
}
