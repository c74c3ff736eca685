//! Structured round outputs.
//!
//! Each round returns JSON conforming to a round-specific schema. The
//! variants here are the parsed, typed forms; the schema descriptors are
//! what the provider embeds in the request so the model emits matching
//! JSON. Every variant exposes the four projection lists the compressor
//! extracts for downstream rounds.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A module of the analyzed codebase as described by a round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleSummary {
    /// Module name
    pub name: String,
    /// One-paragraph purpose
    pub purpose: String,
    /// Repository-relative files making up the module
    pub files: Vec<String>,
    /// Key exported symbols
    pub public_api: Vec<String>,
}

/// A notable observation about the codebase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Finding {
    /// Short title
    pub title: String,
    /// Explanation with code references
    pub detail: String,
    /// Files the finding cites
    pub files: Vec<String>,
}

/// A directed relationship between two parts of the codebase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Relationship {
    /// Source module or file
    pub from: String,
    /// Target module or file
    pub to: String,
    /// Relationship kind ("calls", "imports", "configures", ...)
    pub kind: String,
}

/// An import statement a round claims exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportClaim {
    /// File said to contain the import
    pub source_file: String,
    /// Symbol said to be imported
    pub imported_symbol: String,
}

/// Round 1: system architecture survey.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArchitectureOutput {
    /// Overall architecture description
    pub summary: String,
    /// Architectural layers from outermost to innermost
    pub layers: Vec<ModuleSummary>,
    /// Entry-point files
    pub entry_points: Vec<String>,
    /// Notable observations
    pub findings: Vec<Finding>,
    /// Cross-layer relationships
    pub relationships: Vec<Relationship>,
    /// Unresolved questions for later rounds
    pub open_questions: Vec<String>,
}

/// Round 2: module inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModulesOutput {
    /// Discovered modules; round 5 fans out over this list
    pub modules: Vec<ModuleSummary>,
    /// Notable observations
    pub findings: Vec<Finding>,
    /// Unresolved questions
    pub open_questions: Vec<String>,
}

/// Round 3: data structures and flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataFlowOutput {
    /// Flow description
    pub summary: String,
    /// Data movement between modules
    pub relationships: Vec<Relationship>,
    /// Concrete import claims backing the relationships
    pub imports: Vec<ImportClaim>,
    /// Notable observations
    pub findings: Vec<Finding>,
    /// Unresolved questions
    pub open_questions: Vec<String>,
}

/// Round 4: public interfaces and integration points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfacesOutput {
    /// Exposed interfaces (CLIs, APIs, config surfaces)
    pub interfaces: Vec<InterfaceInfo>,
    /// Interface-to-module relationships
    pub relationships: Vec<Relationship>,
    /// Concrete import claims backing interface wiring
    pub imports: Vec<ImportClaim>,
    /// Notable observations
    pub findings: Vec<Finding>,
    /// Unresolved questions
    pub open_questions: Vec<String>,
}

/// One public interface of the codebase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterfaceInfo {
    /// Interface name
    pub name: String,
    /// Interface kind ("cli", "http", "config", "library")
    pub kind: String,
    /// Defining file
    pub file: String,
    /// Usage description
    pub description: String,
}

/// Round 5: per-module deep dives gathered by fan-out.
///
/// Slots align with round 2's module list; a failed sub-query leaves its
/// slot empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeepDiveOutput {
    /// Per-module details in round-2 module order
    pub module_details: Vec<Option<ModuleDetail>>,
    /// Notable observations
    pub findings: Vec<Finding>,
    /// Unresolved questions
    pub open_questions: Vec<String>,
}

/// Deep-dive detail for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleDetail {
    /// Module name, matching round 2
    pub name: String,
    /// Extended description
    pub summary: String,
    /// Files worth reading first
    pub key_files: Vec<String>,
    /// Sharp edges and invariants
    pub gotchas: Vec<String>,
}

/// Round 6: onboarding guidance and risks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuidanceOutput {
    /// Ordered onboarding steps for a new contributor
    pub onboarding_steps: Vec<String>,
    /// Risky areas with code references
    pub findings: Vec<Finding>,
    /// Unresolved questions worth asking the original authors
    pub open_questions: Vec<String>,
}

/// Typed output of any round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "round", rename_all = "camelCase")]
pub enum RoundOutput {
    /// Round 1
    Architecture(ArchitectureOutput),
    /// Round 2
    Modules(ModulesOutput),
    /// Round 3
    DataFlow(DataFlowOutput),
    /// Round 4
    Interfaces(InterfacesOutput),
    /// Round 5
    DeepDive(DeepDiveOutput),
    /// Round 6
    Guidance(GuidanceOutput),
}

impl RoundOutput {
    /// Round number this variant belongs to.
    pub fn round_number(&self) -> u8 {
        match self {
            Self::Architecture(_) => 1,
            Self::Modules(_) => 2,
            Self::DataFlow(_) => 3,
            Self::Interfaces(_) => 4,
            Self::DeepDive(_) => 5,
            Self::Guidance(_) => 6,
        }
    }

    /// Schema-consistent empty output for a round, used when the provider
    /// fails and the round degrades.
    pub fn fallback(round: u8) -> Self {
        match round {
            1 => Self::Architecture(ArchitectureOutput::default()),
            2 => Self::Modules(ModulesOutput::default()),
            3 => Self::DataFlow(DataFlowOutput::default()),
            4 => Self::Interfaces(InterfacesOutput::default()),
            5 => Self::DeepDive(DeepDiveOutput::default()),
            _ => Self::Guidance(GuidanceOutput::default()),
        }
    }

    /// Parse a provider JSON value into the typed output for a round.
    pub fn from_value(round: u8, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match round {
            1 => Self::Architecture(serde_json::from_value(value)?),
            2 => Self::Modules(serde_json::from_value(value)?),
            3 => Self::DataFlow(serde_json::from_value(value)?),
            4 => Self::Interfaces(serde_json::from_value(value)?),
            5 => Self::DeepDive(serde_json::from_value(value)?),
            _ => Self::Guidance(serde_json::from_value(value)?),
        })
    }

    /// Modules described by this output.
    pub fn modules(&self) -> Vec<&ModuleSummary> {
        match self {
            Self::Architecture(o) => o.layers.iter().collect(),
            Self::Modules(o) => o.modules.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Findings reported by this output.
    pub fn findings(&self) -> &[Finding] {
        match self {
            Self::Architecture(o) => &o.findings,
            Self::Modules(o) => &o.findings,
            Self::DataFlow(o) => &o.findings,
            Self::Interfaces(o) => &o.findings,
            Self::DeepDive(o) => &o.findings,
            Self::Guidance(o) => &o.findings,
        }
    }

    /// Relationships reported by this output.
    pub fn relationships(&self) -> &[Relationship] {
        match self {
            Self::Architecture(o) => &o.relationships,
            Self::DataFlow(o) => &o.relationships,
            Self::Interfaces(o) => &o.relationships,
            _ => &[],
        }
    }

    /// Open questions reported by this output.
    pub fn open_questions(&self) -> &[String] {
        match self {
            Self::Architecture(o) => &o.open_questions,
            Self::Modules(o) => &o.open_questions,
            Self::DataFlow(o) => &o.open_questions,
            Self::Interfaces(o) => &o.open_questions,
            Self::DeepDive(o) => &o.open_questions,
            Self::Guidance(o) => &o.open_questions,
        }
    }
}

/// JSON schema descriptor embedded in a round's provider request.
pub fn round_schema(round: u8) -> serde_json::Value {
    let module = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "purpose": {"type": "string"},
            "files": {"type": "array", "items": {"type": "string"}},
            "publicApi": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["name", "purpose", "files"]
    });
    let finding = json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "detail": {"type": "string"},
            "files": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["title", "detail"]
    });
    let relationship = json!({
        "type": "object",
        "properties": {
            "from": {"type": "string"},
            "to": {"type": "string"},
            "kind": {"type": "string"}
        },
        "required": ["from", "to", "kind"]
    });
    let import_claim = json!({
        "type": "object",
        "properties": {
            "sourceFile": {"type": "string"},
            "importedSymbol": {"type": "string"}
        },
        "required": ["sourceFile", "importedSymbol"]
    });
    let questions = json!({"type": "array", "items": {"type": "string"}});

    match round {
        1 => json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "layers": {"type": "array", "items": module},
                "entryPoints": {"type": "array", "items": {"type": "string"}},
                "findings": {"type": "array", "items": finding},
                "relationships": {"type": "array", "items": relationship},
                "openQuestions": questions
            },
            "required": ["summary", "layers", "entryPoints"]
        }),
        2 => json!({
            "type": "object",
            "properties": {
                "modules": {"type": "array", "items": module},
                "findings": {"type": "array", "items": finding},
                "openQuestions": questions
            },
            "required": ["modules"]
        }),
        3 => json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "relationships": {"type": "array", "items": relationship},
                "imports": {"type": "array", "items": import_claim},
                "findings": {"type": "array", "items": finding},
                "openQuestions": questions
            },
            "required": ["summary", "relationships"]
        }),
        4 => json!({
            "type": "object",
            "properties": {
                "interfaces": {"type": "array", "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "kind": {"type": "string"},
                        "file": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["name", "kind", "file"]
                }},
                "relationships": {"type": "array", "items": relationship},
                "imports": {"type": "array", "items": import_claim},
                "findings": {"type": "array", "items": finding},
                "openQuestions": questions
            },
            "required": ["interfaces"]
        }),
        5 => json!({
            "type": "object",
            "properties": {
                "moduleDetails": {"type": "array", "items": {
                    "type": ["object", "null"],
                    "properties": {
                        "name": {"type": "string"},
                        "summary": {"type": "string"},
                        "keyFiles": {"type": "array", "items": {"type": "string"}},
                        "gotchas": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["name", "summary"]
                }},
                "findings": {"type": "array", "items": finding},
                "openQuestions": questions
            },
            "required": ["moduleDetails"]
        }),
        _ => json!({
            "type": "object",
            "properties": {
                "onboardingSteps": {"type": "array", "items": {"type": "string"}},
                "findings": {"type": "array", "items": finding},
                "openQuestions": questions
            },
            "required": ["onboardingSteps"]
        }),
    }
}

/// Schema for one module's deep-dive sub-query inside round 5.
pub fn module_detail_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "summary": {"type": "string"},
            "keyFiles": {"type": "array", "items": {"type": "string"}},
            "gotchas": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["name", "summary"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_matches_round_number() {
        for round in 1..=6u8 {
            assert_eq!(RoundOutput::fallback(round).round_number(), round);
        }
    }

    #[test]
    fn test_fallback_is_idempotent() {
        assert_eq!(RoundOutput::fallback(3), RoundOutput::fallback(3));
    }

    #[test]
    fn test_parse_round_two_output() {
        let value = serde_json::json!({
            "modules": [
                {"name": "core", "purpose": "shared types", "files": ["src/core/mod.rs"]}
            ],
            "openQuestions": ["why two config layers?"]
        });
        let output = RoundOutput::from_value(2, value).unwrap();
        assert_eq!(output.modules().len(), 1);
        assert_eq!(output.open_questions().len(), 1);
    }

    #[test]
    fn test_missing_optional_sections_default() {
        let output = RoundOutput::from_value(6, serde_json::json!({"onboardingSteps": []})).unwrap();
        assert!(output.findings().is_empty());
        assert!(output.relationships().is_empty());
    }
}
