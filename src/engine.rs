use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, warn};
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::decoder::decode;
use crate::error::AnalysisError;
use crate::findings::{Diagnostic, DiagnosticSink, Finding, FindingSink};
use crate::ir::{Class, ConstantPool, Method};
use crate::rules::{MethodTarget, Rule, Step};
use crate::stack::simulate;

/// One method handed to the engine, with the pool its operands index into.
#[derive(Clone, Copy, Debug)]
pub(crate) struct MethodInput<'a> {
    pub(crate) class_name: &'a str,
    pub(crate) pool: &'a ConstantPool,
    pub(crate) method: &'a Method,
}

/// Everything a run produced, ordered by class and method.
#[derive(Debug, Default)]
pub(crate) struct EngineOutput {
    pub(crate) findings: Vec<Finding>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) method_count: usize,
    pub(crate) skipped_methods: usize,
}

/// Runs the enabled rules over decoded and simulated method bodies.
pub(crate) struct Engine {
    rules: Vec<Rule>,
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    /// Once `shutdown` is set, methods that have not started yet are skipped.
    pub(crate) fn new(config: &AnalysisConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            rules: Rule::enabled(config),
            shutdown,
        }
    }

    pub(crate) fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub(crate) fn analyze_classes(&self, classes: &[Class]) -> EngineOutput {
        self.analyze(&method_inputs(classes))
    }

    /// Analyse methods in parallel.
    pub(crate) fn analyze(&self, inputs: &[MethodInput<'_>]) -> EngineOutput {
        let run = Run::default();
        inputs
            .par_iter()
            .for_each(|input| self.analyze_method(input, &run));
        run.finish()
    }

    fn analyze_method(&self, input: &MethodInput<'_>, run: &Run) {
        if self.shutdown.load(Ordering::Relaxed) {
            run.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        run.analysed.fetch_add(1, Ordering::Relaxed);

        let MethodInput {
            class_name,
            pool,
            method,
        } = *input;
        let target = MethodTarget { class_name, method };
        debug!(
            "analysing {} ({} bytes)",
            method.id().qualified(class_name),
            method.bytecode.len()
        );

        let mut active = vec![true; self.rules.len()];
        for (index, rule) in self.rules.iter().enumerate() {
            match guarded(rule, 0, || rule.check_method(&target)) {
                Ok(Some(finding)) => run.record_finding(finding),
                Ok(None) => {}
                Err(error) => {
                    active[index] = false;
                    run.record_error(&target, &error);
                }
            }
        }
        if method.bytecode.is_empty() {
            return;
        }

        let instructions = match decode(&method.bytecode, pool) {
            Ok(instructions) => instructions,
            Err(error) => {
                run.record_error(&target, &error);
                return;
            }
        };

        // Instruction findings only count once the whole body replays cleanly.
        let mut pending = Vec::new();
        let replay = simulate(class_name, method, &instructions, |instruction, pre, post| {
            let step = Step {
                instruction,
                pre,
                post,
            };
            for (index, rule) in self.rules.iter().enumerate() {
                if !active[index] {
                    continue;
                }
                let checked = guarded(rule, instruction.offset, || {
                    rule.check_instruction(&target, &step)
                });
                match checked {
                    Ok(Some(finding)) => pending.push(finding),
                    Ok(None) => {}
                    Err(error) => {
                        active[index] = false;
                        run.record_error(&target, &error);
                    }
                }
            }
        });

        match replay {
            Ok(summary) => {
                if summary.peak_slots > usize::from(method.max_stack) {
                    debug!(
                        "{} peaks at {} stack slots, declared max_stack is {}",
                        method.id().qualified(class_name),
                        summary.peak_slots,
                        method.max_stack
                    );
                }
                for finding in pending {
                    run.record_finding(finding);
                }
            }
            Err(error) => run.record_error(&target, &error),
        }
    }
}

/// Run one rule check; a panic becomes a failure of that rule alone.
fn guarded(
    rule: &Rule,
    offset: u32,
    check: impl FnOnce() -> Result<Option<Finding>, AnalysisError>,
) -> Result<Option<Finding>, AnalysisError> {
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
                String::from(*message)
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                String::from("unknown panic")
            };
            Err(AnalysisError::RuleEvaluation {
                rule_id: rule.metadata().id,
                offset,
                reason: format!("panicked: {message}"),
            })
        }
    }
}

/// Flatten classes into engine inputs, in class then declaration order.
pub(crate) fn method_inputs(classes: &[Class]) -> Vec<MethodInput<'_>> {
    classes
        .iter()
        .flat_map(|class| {
            class.methods.iter().map(move |method| MethodInput {
                class_name: &class.name,
                pool: &class.constant_pool,
                method,
            })
        })
        .collect()
}

/// Shared state for one `analyze` call.
#[derive(Default)]
struct Run {
    findings: FindingSink,
    diagnostics: DiagnosticSink,
    analysed: AtomicUsize,
    skipped: AtomicUsize,
}

impl Run {
    fn record_finding(&self, finding: Finding) {
        debug!(
            "{} at {} offset {}",
            finding.rule_id,
            finding.method.qualified(&finding.class_name),
            finding.offset
        );
        self.findings.record(finding);
    }

    fn record_error(&self, target: &MethodTarget<'_>, error: &AnalysisError) {
        let diagnostic = Diagnostic::from_error(target.class_name, target.method.id(), error);
        warn!(
            "{} in {}: {}",
            diagnostic.kind.as_str(),
            diagnostic.method.qualified(&diagnostic.class_name),
            diagnostic.message
        );
        self.diagnostics.record(diagnostic);
    }

    fn finish(self) -> EngineOutput {
        // Methods finish in any order; within a method discovery order is kept.
        let mut findings = self.findings.drain();
        findings.sort_by(|a, b| (&a.class_name, &a.method).cmp(&(&b.class_name, &b.method)));
        let mut diagnostics = self.diagnostics.drain();
        diagnostics.sort_by(|a, b| (&a.class_name, &a.method).cmp(&(&b.class_name, &b.method)));
        EngineOutput {
            findings,
            diagnostics,
            method_count: self.analysed.into_inner(),
            skipped_methods: self.skipped.into_inner(),
        }
    }
}
