//! SARIF log describing which classes were processed and which methods rewritten.

use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, Location, LogicalLocation, Message, PhysicalLocation,
    Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::descriptor::MethodSignature;

pub const RULE_ID: &str = "HOOKWEAVE_REWRITE";

/// Outcome of one processed class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRecord {
    /// File path, or `jar:<path>!/<entry>` for archive entries.
    pub uri: String,
    pub class_name: String,
    pub length: u64,
    pub rewritten: Vec<MethodSignature>,
}

pub fn build_sarif(records: &[ClassRecord], invocation: Invocation) -> Sarif {
    let driver = ToolComponent::builder()
        .name("hookweave")
        .version(env!("CARGO_PKG_VERSION"))
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };

    let artifacts: Vec<Artifact> = records
        .iter()
        .map(|record| {
            Artifact::builder()
                .location(ArtifactLocation::builder().uri(record.uri.clone()).build())
                .length(record.length as i64)
                .roles(vec![json!("analysisTarget")])
                .build()
        })
        .collect();
    let results: Vec<SarifResult> = records
        .iter()
        .enumerate()
        .flat_map(|(index, record)| {
            record
                .rewritten
                .iter()
                .map(move |signature| rewrite_result(record, index, signature))
        })
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

fn rewrite_result(record: &ClassRecord, artifact_index: usize, signature: &MethodSignature) -> SarifResult {
    let logical = LogicalLocation::builder()
        .name(format!(
            "{}.{}{}",
            record.class_name, signature.name, signature.descriptor
        ))
        .kind("function")
        .build();
    let physical = PhysicalLocation::builder()
        .artifact_location(
            ArtifactLocation::builder()
                .uri(record.uri.clone())
                .index(artifact_index as i64)
                .build(),
        )
        .build();
    let location = Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build();
    SarifResult::builder()
        .rule_id(RULE_ID)
        .message(
            Message::builder()
                .text(format!("rewrote {}.{}", record.class_name, signature))
                .build(),
        )
        .locations(vec![location])
        .build()
}
