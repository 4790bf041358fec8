use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use utoipa::ToSchema;

use crate::artifacts::ArtifactSpec;

/// Keys owned by the invocation response. Echoed request fields may not use them.
pub const RESERVED_RESPONSE_KEYS: [&str; 6] = [
    "status",
    "message",
    "error",
    "artifacts",
    "missing_artifacts",
    "invocation_id",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Array of strings
    Array,
    Integer,
    Boolean,
}

impl FieldType {
    fn describe(self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Array => "an array of strings",
            FieldType::Integer => "an integer",
            FieldType::Boolean => "a boolean",
        }
    }
}

/// One declared input field of a tool, plus how it maps onto the worker argv.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Minimum cardinality for array fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    /// Value used when the caller omits the field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Worker flag; defaults to `--<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    /// Join array items into one argument with this separator instead of repeating the flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

impl FieldSpec {
    pub fn flag(&self) -> String {
        self.flag
            .clone()
            .unwrap_or_else(|| format!("--{}", self.name))
    }

    fn property_schema(&self) -> Value {
        let mut schema = match self.field_type {
            FieldType::String => json!({ "type": "string" }),
            FieldType::Array => json!({ "type": "array", "items": { "type": "string" } }),
            FieldType::Integer => json!({ "type": "integer" }),
            FieldType::Boolean => json!({ "type": "boolean" }),
        };
        if let Some(min) = self.min_items {
            schema["minItems"] = json!(min);
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        if let Some(description) = &self.description {
            schema["description"] = json!(description);
        }
        schema
    }
}

/// How to launch the external worker for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub program: String,
    /// Fixed leading arguments. The token `{output_dir}` is substituted.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Wall-clock ceiling; the gateway default applies when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Static configuration of one tool. Built once at startup, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub worker: WorkerSpec,
    /// Directory scanned for artifacts after a successful run
    pub output_dir: PathBuf,
    /// String field whose validated value overrides `output_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir_field: Option<String>,
    #[serde(default)]
    pub input: Vec<FieldSpec>,
    pub artifacts: Vec<ArtifactSpec>,
}

impl ToolConfig {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.input.iter().find(|f| f.name == name)
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.name.clone()).collect()
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
            output_schema: self.output_schema(),
        }
    }

    fn input_schema(&self) -> Value {
        let required: Vec<&str> = self
            .input
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        let properties: Map<String, Value> = self
            .input
            .iter()
            .map(|f| (f.name.clone(), f.property_schema()))
            .collect();
        json!({
            "type": "object",
            "required": required,
            "properties": properties,
            "additionalProperties": false,
        })
    }

    fn output_schema(&self) -> Value {
        let artifact_names = self.artifact_names();
        let artifact_properties: Map<String, Value> = artifact_names
            .iter()
            .map(|name| (name.clone(), json!({ "type": "string" })))
            .collect();

        let mut properties = Map::new();
        properties.insert(
            "status".to_string(),
            json!({ "type": "string", "enum": ["completed", "failed"] }),
        );
        properties.insert("invocation_id".to_string(), json!({ "type": "string" }));
        for field in &self.input {
            properties.insert(field.name.clone(), field.property_schema());
        }
        properties.insert(
            "artifacts".to_string(),
            json!({
                "type": "object",
                "properties": artifact_properties,
                "additionalProperties": false,
            }),
        );
        properties.insert(
            "missing_artifacts".to_string(),
            json!({ "type": "array", "items": { "type": "string", "enum": artifact_names } }),
        );
        properties.insert("error".to_string(), json!({ "type": "string" }));
        properties.insert(
            "message".to_string(),
            json!({ "type": "string", "maxLength": crate::invocation::MAX_MESSAGE_CHARS }),
        );

        json!({
            "type": "object",
            "required": ["status"],
            "properties": properties,
            "additionalProperties": false,
        })
    }

    fn check(&self) -> Result<(), RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidTool {
            tool: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("tool name must not be empty".to_string()));
        }
        if self.worker.program.trim().is_empty() {
            return Err(invalid("worker.program must not be empty".to_string()));
        }
        if self.worker.timeout_secs == Some(0) {
            return Err(invalid("worker.timeout_secs must be positive".to_string()));
        }
        if self.artifacts.is_empty() {
            return Err(invalid("at least one artifact must be declared".to_string()));
        }

        let mut seen = HashSet::new();
        for field in &self.input {
            if field.name.trim().is_empty() {
                return Err(invalid("field names must not be empty".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("field '{}' is declared twice", field.name)));
            }
            if RESERVED_RESPONSE_KEYS.contains(&field.name.as_str()) {
                return Err(invalid(format!(
                    "field '{}' collides with a response key",
                    field.name
                )));
            }
            if field.min_items.is_some() && field.field_type != FieldType::Array {
                return Err(invalid(format!(
                    "field '{}' declares min_items but is not an array",
                    field.name
                )));
            }
            if let Some(default) = &field.default
                && coerce(field, default).is_err()
            {
                return Err(invalid(format!(
                    "default for '{}' must be {}",
                    field.name,
                    field.field_type.describe()
                )));
            }
        }

        let mut artifact_names = HashSet::new();
        for artifact in &self.artifacts {
            if artifact.name.trim().is_empty() || artifact.extension.trim().is_empty() {
                return Err(invalid(
                    "artifacts need a name and an extension".to_string(),
                ));
            }
            if !artifact_names.insert(artifact.name.as_str()) {
                return Err(invalid(format!(
                    "artifact '{}' is declared twice",
                    artifact.name
                )));
            }
        }

        if let Some(dir_field) = &self.output_dir_field {
            match self.field(dir_field) {
                Some(field) if field.field_type == FieldType::String => {}
                _ => {
                    return Err(invalid(format!(
                        "output_dir_field '{dir_field}' must name a declared string field"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Discovery manifest entry for one tool
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    #[schema(value_type = Object)]
    pub input_schema: Value,
    #[serde(rename = "outputSchema")]
    #[schema(value_type = Object)]
    pub output_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read tool registry {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tool registry JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tool '{0}' is declared more than once")]
    DuplicateTool(String),
    #[error("tool '{tool}': {reason}")]
    InvalidTool { tool: String, reason: String },
}

/// A validated, normalized field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Integer(i64),
    Flag(bool),
}

impl FieldValue {
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => json!(s),
            FieldValue::List(items) => json!(items),
            FieldValue::Integer(n) => json!(n),
            FieldValue::Flag(b) => json!(b),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Request that passed validation. Fields keep the tool's declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    tool: String,
    fields: Vec<(String, FieldValue)>,
}

impl ValidatedRequest {
    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Request fields as echoed back in the invocation result.
    pub fn echo(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssueKind {
    Missing,
    WrongType { expected: FieldType },
    TooFewItems { min: usize, actual: usize },
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub kind: FieldIssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldIssueKind::Missing => write!(f, "{} is required", self.field),
            FieldIssueKind::WrongType { expected } => {
                write!(f, "{} must be {}", self.field, expected.describe())
            }
            FieldIssueKind::TooFewItems { min, actual } => write!(
                f,
                "{} is required to contain at least {} item(s), received {}",
                self.field, min, actual
            ),
            FieldIssueKind::Unexpected => write!(f, "{} is not a recognised field", self.field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown tool '{tool}'")]
    UnknownTool { tool: String },
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("{}", join_issues(.issues))]
    InvalidFields { issues: Vec<FieldIssue> },
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::UnknownTool { .. } => crate::error::codes::UNKNOWN_TOOL,
            _ => crate::error::codes::VALIDATION_FAILED,
        }
    }

    pub fn missing_fields(&self) -> Vec<&str> {
        self.issues_of(|kind| matches!(kind, FieldIssueKind::Missing))
    }

    pub fn type_errors(&self) -> Vec<&str> {
        self.issues_of(|kind| matches!(kind, FieldIssueKind::WrongType { .. }))
    }

    /// First offending field, if the error is about a field at all.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::InvalidFields { issues } => issues.first().map(|i| i.field.as_str()),
            _ => None,
        }
    }

    fn issues_of(&self, pred: impl Fn(&FieldIssueKind) -> bool) -> Vec<&str> {
        match self {
            ValidationError::InvalidFields { issues } => issues
                .iter()
                .filter(|issue| pred(&issue.kind))
                .map(|issue| issue.field.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Read-only set of tools, keyed by name, in declaration order.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolConfig>,
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct ToolsFile {
    tools: Vec<ToolConfig>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolConfig>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            tool.check()?;
            if index.insert(tool.name.clone(), position).is_some() {
                return Err(RegistryError::DuplicateTool(tool.name.clone()));
            }
        }
        Ok(Self { tools, index })
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let file: ToolsFile = serde_json::from_str(raw)?;
        Self::new(file.tools)
    }

    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&ToolConfig> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(ToolConfig::descriptor).collect()
    }

    /// Validate a raw request body against a tool's input declaration.
    ///
    /// Order: unknown tool, missing/blank required fields, type errors,
    /// cardinality, then unexpected fields. The first phase that finds
    /// problems reports all of them.
    pub fn validate(
        &self,
        tool_name: &str,
        request: &Value,
    ) -> Result<ValidatedRequest, ValidationError> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| ValidationError::UnknownTool {
                tool: tool_name.to_string(),
            })?;
        let body = request_arguments(tool, request)
            .as_object()
            .ok_or(ValidationError::NotAnObject)?;

        let mut present: Vec<(&FieldSpec, &Value)> = Vec::new();
        let mut missing = Vec::new();
        for field in &tool.input {
            let value = match body.get(&field.name) {
                Some(Value::Null) | None => field.default.as_ref(),
                Some(value) => Some(value),
            };
            match value {
                Some(value) if !is_blank(field, value) => present.push((field, value)),
                _ if field.required => missing.push(issue(field, FieldIssueKind::Missing)),
                _ => {}
            }
        }
        if !missing.is_empty() {
            return Err(ValidationError::InvalidFields { issues: missing });
        }

        let mut coerced = Vec::with_capacity(present.len());
        let mut wrong_type = Vec::new();
        for (field, value) in present {
            match coerce(field, value) {
                Ok(v) => coerced.push((field, v)),
                Err(kind) => wrong_type.push(issue(field, kind)),
            }
        }
        if !wrong_type.is_empty() {
            return Err(ValidationError::InvalidFields { issues: wrong_type });
        }

        let too_few: Vec<FieldIssue> = coerced
            .iter()
            .filter_map(|(field, value)| match (field.min_items, value) {
                (Some(min), FieldValue::List(items)) if items.len() < min => Some(issue(
                    field,
                    FieldIssueKind::TooFewItems {
                        min,
                        actual: items.len(),
                    },
                )),
                _ => None,
            })
            .collect();
        if !too_few.is_empty() {
            return Err(ValidationError::InvalidFields { issues: too_few });
        }

        let unexpected: Vec<FieldIssue> = body
            .keys()
            .filter(|key| tool.field(key).is_none())
            .map(|key| FieldIssue {
                field: key.clone(),
                kind: FieldIssueKind::Unexpected,
            })
            .collect();
        if !unexpected.is_empty() {
            return Err(ValidationError::InvalidFields { issues: unexpected });
        }

        Ok(ValidatedRequest {
            tool: tool.name.clone(),
            fields: coerced
                .into_iter()
                .map(|(field, value)| (field.name.clone(), value))
                .collect(),
        })
    }
}

fn issue(field: &FieldSpec, kind: FieldIssueKind) -> FieldIssue {
    FieldIssue {
        field: field.name.clone(),
        kind,
    }
}

/// Unwrap `{"params": {"arguments": {...}}}` envelopes sent by MCP-style callers.
fn request_arguments<'a>(tool: &ToolConfig, request: &'a Value) -> &'a Value {
    if tool.field("params").is_some() {
        return request;
    }
    match request.pointer("/params/arguments") {
        Some(arguments) if arguments.is_object() => arguments,
        _ => request,
    }
}

/// Blank strings are absent. Arrays without a declared minimum are absent when
/// every item is a blank string (or there are none); arrays with one are left to
/// the cardinality check.
fn is_blank(field: &FieldSpec, value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => {
            field.min_items.is_none()
                && items
                    .iter()
                    .all(|item| item.as_str().is_some_and(|s| s.trim().is_empty()))
        }
        _ => false,
    }
}

fn coerce(field: &FieldSpec, value: &Value) -> Result<FieldValue, FieldIssueKind> {
    let wrong = FieldIssueKind::WrongType {
        expected: field.field_type,
    };
    match (field.field_type, value) {
        (FieldType::String, Value::String(s)) => Ok(FieldValue::Text(s.trim().to_string())),
        (FieldType::Array, Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let text = item.as_str().ok_or(wrong.clone())?.trim();
                if !text.is_empty() {
                    out.push(text.to_string());
                }
            }
            Ok(FieldValue::List(out))
        }
        (FieldType::Integer, Value::Number(n)) => n.as_i64().map(FieldValue::Integer).ok_or(wrong),
        (FieldType::Boolean, Value::Bool(b)) => Ok(FieldValue::Flag(*b)),
        _ => Err(wrong),
    }
}
