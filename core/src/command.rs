use std::path::PathBuf;

use crate::tools::{FieldValue, ToolConfig, ValidatedRequest};

/// Placeholder in `worker.args` replaced by the artifact directory.
pub const OUTPUT_DIR_TOKEN: &str = "{output_dir}";

/// Fully assembled worker invocation. Arguments are a discrete vector and are
/// never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Build the worker command for a validated request.
    ///
    /// Each request field maps 1:1 onto its flag, in declaration order, after
    /// the tool's fixed arguments.
    pub fn for_request(tool: &ToolConfig, request: &ValidatedRequest) -> Self {
        let output_dir = artifact_dir(tool, request);
        let output_dir = output_dir.to_string_lossy();

        let mut args: Vec<String> = tool
            .worker
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_DIR_TOKEN, &output_dir))
            .collect();

        for (name, value) in request.fields() {
            let Some(field) = tool.field(name) else {
                continue;
            };
            let flag = field.flag();
            match value {
                FieldValue::Text(text) => {
                    args.push(flag);
                    args.push(text.clone());
                }
                FieldValue::Integer(n) => {
                    args.push(flag);
                    args.push(n.to_string());
                }
                FieldValue::Flag(true) => args.push(flag),
                FieldValue::Flag(false) => {}
                FieldValue::List(items) => match &field.separator {
                    Some(separator) => {
                        args.push(flag);
                        args.push(items.join(separator));
                    }
                    None => {
                        for item in items {
                            args.push(flag.clone());
                            args.push(item.clone());
                        }
                    }
                },
            }
        }

        Self {
            program: tool.worker.program.clone(),
            args,
            working_dir: tool.worker.working_dir.clone(),
            env: tool
                .worker
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Human-readable rendering for logs. Not meant to be executed.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("{part:?}")
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Directory scanned for a request's artifacts: the tool's `output_dir`,
/// unless `output_dir_field` names a field the caller filled in.
pub fn artifact_dir(tool: &ToolConfig, request: &ValidatedRequest) -> PathBuf {
    tool.output_dir_field
        .as_deref()
        .and_then(|field| request.get(field))
        .and_then(FieldValue::as_text)
        .map(PathBuf::from)
        .unwrap_or_else(|| tool.output_dir.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::from_json(
            &json!({
                "tools": [{
                    "name": "assess",
                    "worker": {
                        "program": "pwsh",
                        "args": ["-NoLogo", "-NonInteractive", "-File", "run.ps1", "-Out", "{output_dir}"],
                        "env": { "ASSESS_MODE": "full" }
                    },
                    "output_dir": "/srv/reports",
                    "output_dir_field": "outPath",
                    "input": [
                        { "name": "subscriptionId", "type": "string", "required": true, "flag": "-SubscriptionId" },
                        { "name": "resourceGroups", "type": "array", "required": true, "min_items": 1,
                          "flag": "-ResourceGroups", "separator": "," },
                        { "name": "tags", "type": "array" },
                        { "name": "outPath", "type": "string" },
                        { "name": "verbose", "type": "boolean" },
                        { "name": "depth", "type": "integer" }
                    ],
                    "artifacts": [{ "name": "xlsx", "extension": "xlsx" }]
                }]
            })
            .to_string(),
        )
        .expect("fixture registry should load")
    }

    #[test]
    fn fields_map_one_to_one_onto_flags() {
        let registry = registry();
        let tool = registry.get("assess").unwrap();
        let request = registry
            .validate(
                "assess",
                &json!({
                    "subscriptionId": "sub-123",
                    "resourceGroups": ["rg-a", "rg-b"],
                    "tags": ["x", "y"],
                    "verbose": true,
                    "depth": 3
                }),
            )
            .unwrap();

        let command = CommandLine::for_request(tool, &request);
        assert_eq!(command.program, "pwsh");
        assert_eq!(
            command.args,
            vec![
                "-NoLogo", "-NonInteractive", "-File", "run.ps1", "-Out", "/srv/reports",
                "-SubscriptionId", "sub-123",
                "-ResourceGroups", "rg-a,rg-b",
                "--tags", "x", "--tags", "y",
                "--verbose",
                "--depth", "3",
            ]
        );
        assert_eq!(command.env, vec![("ASSESS_MODE".to_string(), "full".to_string())]);
    }

    #[test]
    fn shell_metacharacters_stay_inside_one_argument() {
        let registry = registry();
        let tool = registry.get("assess").unwrap();
        let request = registry
            .validate(
                "assess",
                &json!({ "subscriptionId": "x; rm -rf /", "resourceGroups": ["a"], "verbose": false }),
            )
            .unwrap();
        let command = CommandLine::for_request(tool, &request);
        assert!(command.args.contains(&"x; rm -rf /".to_string()));
        assert!(!command.args.contains(&"--verbose".to_string()));
    }

    #[test]
    fn output_dir_field_overrides_configured_directory() {
        let registry = registry();
        let tool = registry.get("assess").unwrap();
        let request = registry
            .validate(
                "assess",
                &json!({ "subscriptionId": "s", "resourceGroups": ["a"], "outPath": "/tmp/run-1" }),
            )
            .unwrap();
        assert_eq!(artifact_dir(tool, &request), PathBuf::from("/tmp/run-1"));
        let command = CommandLine::for_request(tool, &request);
        assert_eq!(command.args[5], "/tmp/run-1");
    }

    #[test]
    fn display_quotes_whitespace() {
        let command = CommandLine::new("worker").arg("-Name").arg("two words");
        assert_eq!(command.display(), r#"worker -Name "two words""#);
    }
}
