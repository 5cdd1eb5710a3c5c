use crate::descriptor::{array_element, is_primitive, parse_method_descriptor};
use crate::error::AnalysisError;
use crate::findings::{Finding, Severity};
use crate::opcodes;
use crate::rules::{MethodTarget, RuleMetadata, Step};

pub(crate) const CONFUSING_ARRAY_AS_LIST: &str = "CAAL_CONFUSING_ARRAY_AS_LIST";

const ARRAYS: &str = "java/util/Arrays";
const AS_LIST: &str = "asList";

/// Rule that reports `Arrays.asList` calls which wrap a primitive array as a
/// single list element instead of boxing its elements.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConfusingArrayAsListRule;

impl ConfusingArrayAsListRule {
    pub(crate) fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: CONFUSING_ARRAY_AS_LIST,
            name: "Confusing Arrays.asList",
            description: "Arrays.asList on a primitive array yields a one-element list of the array",
        }
    }

    pub(crate) fn check_instruction(
        &self,
        target: &MethodTarget<'_>,
        step: &Step<'_>,
    ) -> Result<Option<Finding>, AnalysisError> {
        let inst = step.instruction;
        if inst.opcode != opcodes::INVOKESTATIC {
            return Ok(None);
        }
        let Some(call) = inst.method_ref() else {
            return Ok(None);
        };
        if call.owner != ARRAYS || call.name != AS_LIST {
            return Ok(None);
        }
        let descriptor =
            parse_method_descriptor(&call.descriptor).map_err(|err| AnalysisError::RuleEvaluation {
                rule_id: CONFUSING_ARRAY_AS_LIST,
                offset: inst.offset,
                reason: format!("{err:#}"),
            })?;
        if descriptor.parameters.len() != 1 {
            return Ok(None);
        }
        let (Some(argument), Some(_)) = (step.pre.item(0), step.post.item(0)) else {
            return Err(AnalysisError::RuleEvaluation {
                rule_id: CONFUSING_ARRAY_AS_LIST,
                offset: inst.offset,
                reason: format!(
                    "call site stack does not match the callee (depth {} before, {} after)",
                    step.pre.depth(),
                    step.post.depth()
                ),
            });
        };
        if !holds_primitive_array(&argument.signature) {
            return Ok(None);
        }
        // javac passes `asList(a, b, c)` as a fresh array of known length; more
        // than one element means the wrapping was intended.
        if argument.int_constant().is_some_and(|length| length > 1) {
            return Ok(None);
        }
        Ok(Some(target.finding(
            CONFUSING_ARRAY_AS_LIST,
            inst.offset,
            Severity::Normal,
        )))
    }
}

/// `[I` (a primitive array) or `[[I` (javac's varargs array around one).
fn holds_primitive_array(signature: &str) -> bool {
    let Some(element) = array_element(signature) else {
        return false;
    };
    if is_primitive(element) {
        return true;
    }
    array_element(element).is_some_and(is_primitive)
}
