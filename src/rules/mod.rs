use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::findings::{Finding, Severity};
use crate::ir::{Instruction, Method};
use crate::stack::StackView;

pub(crate) mod confusing_array_as_list;
pub(crate) mod unjitable_method;

pub(crate) use confusing_array_as_list::{CONFUSING_ARRAY_AS_LIST, ConfusingArrayAsListRule};
pub(crate) use unjitable_method::{UNJITABLE_METHOD, UnjitableMethodRule};

/// Identifiers of every rule this tool ships, in reporting order.
pub(crate) const RULE_IDS: [&str; 2] = [UNJITABLE_METHOD, CONFUSING_ARRAY_AS_LIST];

type RuleResult = std::result::Result<Option<Finding>, AnalysisError>;

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// The method a rule is looking at.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MethodTarget<'a> {
    pub(crate) class_name: &'a str,
    pub(crate) method: &'a Method,
}

impl MethodTarget<'_> {
    pub(crate) fn finding(&self, rule_id: &'static str, offset: u32, severity: Severity) -> Finding {
        Finding {
            rule_id,
            class_name: self.class_name.to_string(),
            method: self.method.id(),
            offset,
            severity,
        }
    }
}

/// One replayed instruction with the stack before and after it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Step<'a> {
    pub(crate) instruction: &'a Instruction,
    pub(crate) pre: StackView<'a>,
    pub(crate) post: StackView<'a>,
}

/// Closed set of detectors. Rules carry configuration only, so one instance
/// is shared by every method analysed concurrently.
#[derive(Clone, Debug)]
pub(crate) enum Rule {
    UnjitableMethod(UnjitableMethodRule),
    ConfusingArrayAsList(ConfusingArrayAsListRule),
}

impl Rule {
    /// Rules enabled by `config`, in reporting order.
    pub(crate) fn enabled(config: &AnalysisConfig) -> Vec<Rule> {
        let all = [
            Rule::UnjitableMethod(UnjitableMethodRule::new(
                config.oversized_method_threshold_bytes,
            )),
            Rule::ConfusingArrayAsList(ConfusingArrayAsListRule),
        ];
        all.into_iter()
            .filter(|rule| config.is_enabled(rule.metadata().id))
            .collect()
    }

    pub(crate) fn metadata(&self) -> RuleMetadata {
        match self {
            Rule::UnjitableMethod(rule) => rule.metadata(),
            Rule::ConfusingArrayAsList(rule) => rule.metadata(),
        }
    }

    /// Called once per method, before any instruction is replayed.
    pub(crate) fn check_method(&self, target: &MethodTarget<'_>) -> RuleResult {
        match self {
            Rule::UnjitableMethod(rule) => Ok(rule.check_method(target)),
            Rule::ConfusingArrayAsList(_) => Ok(None),
        }
    }

    /// Called for every instruction, in program order.
    pub(crate) fn check_instruction(&self, target: &MethodTarget<'_>, step: &Step<'_>) -> RuleResult {
        match self {
            Rule::UnjitableMethod(_) => Ok(None),
            Rule::ConfusingArrayAsList(rule) => rule.check_instruction(target, step),
        }
    }
}
