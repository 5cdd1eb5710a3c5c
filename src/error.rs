use thiserror::Error;

/// Per-method analysis failures. None of these abort a run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub(crate) enum AnalysisError {
    #[error("malformed method body at offset {offset}: {reason}")]
    MalformedBody { offset: u32, reason: String },
    #[error("stack underflow at offset {offset} ({mnemonic}): needs {required}, has {available}")]
    StackUnderflow {
        offset: u32,
        mnemonic: &'static str,
        required: usize,
        available: usize,
    },
    #[error("rule {rule_id} failed at offset {offset}: {reason}")]
    RuleEvaluation {
        rule_id: &'static str,
        offset: u32,
        reason: String,
    },
}

impl AnalysisError {
    pub(crate) fn malformed(offset: u32, reason: impl Into<String>) -> Self {
        Self::MalformedBody {
            offset,
            reason: reason.into(),
        }
    }
}
