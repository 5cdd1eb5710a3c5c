use std::sync::{Mutex, PoisonError};

use crate::error::AnalysisError;
use crate::ir::MethodId;

/// Priority attached to a finding; sets the SARIF result level.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Severity {
    Low,
    Normal,
    High,
}

impl Severity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Normal => "normal",
            Severity::High => "high",
        }
    }
}

/// A single detected anti-pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Finding {
    pub(crate) rule_id: &'static str,
    pub(crate) class_name: String,
    pub(crate) method: MethodId,
    pub(crate) offset: u32,
    pub(crate) severity: Severity,
}

/// Kind of analysis-quality failure, reported apart from findings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum DiagnosticKind {
    MalformedBody,
    StackUnderflow,
    RuleEvaluation,
}

impl DiagnosticKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::MalformedBody => "malformed-body",
            DiagnosticKind::StackUnderflow => "stack-underflow",
            DiagnosticKind::RuleEvaluation => "rule-evaluation",
        }
    }
}

/// Structured record of a method (or rule) that could not be analysed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Diagnostic {
    pub(crate) kind: DiagnosticKind,
    pub(crate) class_name: String,
    pub(crate) method: MethodId,
    pub(crate) rule_id: Option<&'static str>,
    pub(crate) message: String,
}

impl Diagnostic {
    pub(crate) fn from_error(class_name: &str, method: MethodId, error: &AnalysisError) -> Self {
        let (kind, rule_id) = match error {
            AnalysisError::MalformedBody { .. } => (DiagnosticKind::MalformedBody, None),
            AnalysisError::StackUnderflow { .. } => (DiagnosticKind::StackUnderflow, None),
            AnalysisError::RuleEvaluation { rule_id, .. } => {
                (DiagnosticKind::RuleEvaluation, Some(*rule_id))
            }
        };
        Self {
            kind,
            class_name: class_name.to_string(),
            method,
            rule_id,
            message: error.to_string(),
        }
    }
}

/// Append-only log that many analysis threads can record into.
#[derive(Debug)]
pub(crate) struct Sink<T> {
    entries: Mutex<Vec<T>>,
}

pub(crate) type FindingSink = Sink<Finding>;
pub(crate) type DiagnosticSink = Sink<Diagnostic>;

impl<T> Default for Sink<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Sink<T> {
    /// Entries are kept in the order they were recorded; nothing is deduplicated.
    pub(crate) fn record(&self, entry: T) {
        // A push either happened or it did not; poisoning is ignored.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn finding(offset: u32) -> Finding {
        Finding {
            rule_id: "TEST_RULE",
            class_name: "com/example/App".to_string(),
            method: MethodId {
                name: "run".to_string(),
                descriptor: "()V".to_string(),
            },
            offset,
            severity: Severity::Normal,
        }
    }

    #[test]
    fn sink_keeps_duplicates_in_discovery_order() {
        let sink = FindingSink::default();
        sink.record(finding(4));
        sink.record(finding(1));
        sink.record(finding(4));

        let drained = sink.drain();

        let offsets: Vec<u32> = drained.iter().map(|finding| finding.offset).collect();
        assert_eq!(offsets, vec![4, 1, 4]);
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn sink_accepts_concurrent_appends() {
        let sink = Arc::new(FindingSink::default());
        let handles: Vec<_> = (0..8)
            .map(|thread_index| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for offset in 0..50 {
                        sink.record(finding(thread_index * 100 + offset));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join writer");
        }

        assert_eq!(sink.len(), 400);
    }

    #[test]
    fn diagnostics_classify_errors() {
        let method = MethodId {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
        };
        let error = AnalysisError::RuleEvaluation {
            rule_id: "TEST_RULE",
            offset: 3,
            reason: "boom".to_string(),
        };

        let diagnostic = Diagnostic::from_error("com/example/App", method, &error);

        assert_eq!(diagnostic.kind, DiagnosticKind::RuleEvaluation);
        assert_eq!(diagnostic.rule_id, Some("TEST_RULE"));
        assert!(diagnostic.message.contains("boom"));
    }
}
