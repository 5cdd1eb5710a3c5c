use crate::findings::{Finding, Severity};
use crate::rules::{MethodTarget, RuleMetadata};

pub(crate) const UNJITABLE_METHOD: &str = "UJM_UNJITABLE_METHOD";

/// Rule that reports method bodies too large for the JIT to compile.
#[derive(Clone, Debug)]
pub(crate) struct UnjitableMethodRule {
    threshold: usize,
}

impl UnjitableMethodRule {
    pub(crate) fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub(crate) fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: UNJITABLE_METHOD,
            name: "Unjitable method",
            description: "Method bodies at or above the JIT size limit are always interpreted",
        }
    }

    pub(crate) fn check_method(&self, target: &MethodTarget<'_>) -> Option<Finding> {
        let method = target.method;
        // Static initializers are exempt.
        if method.is_static_initializer() {
            return None;
        }
        if method.bytecode.len() < self.threshold {
            return None;
        }
        Some(target.finding(UNJITABLE_METHOD, 0, Severity::Normal))
    }
}
