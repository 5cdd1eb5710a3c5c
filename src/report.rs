use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Location, LogicalLocation, Message, MultiformatMessageString,
    Notification, ReportingDescriptor, Result as SarifResult, ResultLevel, Run, SCHEMA_URL,
    Sarif, Tool, ToolComponent,
};

use crate::engine::EngineOutput;
use crate::findings::{Diagnostic, Finding, Severity};
use crate::ir::MethodId;
use crate::rules::{Rule, RuleMetadata};

const TOOL_NAME: &str = "bytewise";

pub(crate) fn build_invocation(arguments: Vec<String>, diagnostics: &[Diagnostic]) -> Invocation {
    let command_line = arguments.join(" ");
    let notifications: Vec<Notification> = diagnostics.iter().map(notification).collect();

    if notifications.is_empty() {
        Invocation::builder()
            .execution_successful(true)
            .arguments(arguments)
            .command_line(command_line)
            .build()
    } else {
        Invocation::builder()
            .execution_successful(true)
            .arguments(arguments)
            .command_line(command_line)
            .tool_execution_notifications(notifications)
            .build()
    }
}

pub(crate) fn build_sarif(
    rules: &[Rule],
    output: &EngineOutput,
    artifacts: Vec<Artifact>,
    invocation: Invocation,
) -> Sarif {
    let metadata: Vec<RuleMetadata> = rules.iter().map(Rule::metadata).collect();
    let descriptors: Vec<ReportingDescriptor> = metadata.iter().map(descriptor).collect();
    let driver = ToolComponent::builder()
        .name(TOOL_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .rules(descriptors)
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let results: Vec<SarifResult> = output
        .findings
        .iter()
        .map(|finding| result(finding, &metadata))
        .collect();

    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

fn descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

fn result(finding: &Finding, metadata: &[RuleMetadata]) -> SarifResult {
    let summary = metadata
        .iter()
        .find(|rule| rule.id == finding.rule_id)
        .map_or(finding.rule_id, |rule| rule.description);
    let text = format!(
        "{summary}: {} at offset {} ({} priority)",
        finding.method.qualified(&finding.class_name),
        finding.offset,
        finding.severity.as_str()
    );
    SarifResult::builder()
        .rule_id(finding.rule_id)
        .level(level(finding.severity))
        .message(result_message(text))
        .locations(vec![method_location(&finding.class_name, &finding.method)])
        .build()
}

fn level(severity: Severity) -> ResultLevel {
    match severity {
        Severity::Low => ResultLevel::Note,
        Severity::Normal => ResultLevel::Warning,
        Severity::High => ResultLevel::Error,
    }
}

fn notification(diagnostic: &Diagnostic) -> Notification {
    let text = match diagnostic.rule_id {
        Some(rule_id) => format!("{} ({rule_id}): {}", diagnostic.kind.as_str(), diagnostic.message),
        None => format!("{}: {}", diagnostic.kind.as_str(), diagnostic.message),
    };
    Notification::builder()
        .message(result_message(text))
        .locations(vec![method_location(
            &diagnostic.class_name,
            &diagnostic.method,
        )])
        .build()
}

pub(crate) fn method_location(class_name: &str, method: &MethodId) -> Location {
    let logical = LogicalLocation::builder()
        .name(method.qualified(class_name))
        .kind("function")
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
