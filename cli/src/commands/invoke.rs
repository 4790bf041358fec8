use clap::Args;
use serde_json::{Map, Value};

use crate::util::{api_request, exit_error, parse_args, read_json_from_file};

#[derive(Args)]
pub struct InvokeArgs {
    /// Tool name (see `toolgate-cli tools`)
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Read tool arguments from file (use '-' for stdin)
    #[arg(long, short = 'f', conflicts_with = "data")]
    pub data_file: Option<String>,

    /// Single argument (repeatable): key=value for strings, key:=json for
    /// other types. Repeating a key builds an array.
    #[arg(long = "arg", short = 'a')]
    pub args: Vec<String>,

    /// Skip pretty-printing (raw JSON for piping)
    #[arg(long)]
    pub raw: bool,
}

pub async fn run(api_url: &str, args: InvokeArgs) -> i32 {
    if args.tool.is_empty() || args.tool.contains('/') {
        exit_error(
            &format!("Invalid tool name: '{}'", args.tool),
            Some("Tool names are listed by `toolgate-cli tools`."),
        );
    }

    let body = match build_body(&args) {
        Ok(body) => body,
        Err(e) => exit_error(&e, Some("Pass --data '{...}', --data-file PATH or --arg key=value")),
    };

    api_request(
        api_url,
        reqwest::Method::POST,
        &format!("/tools/{}", args.tool),
        Some(body),
        args.raw,
    )
    .await
}

/// `--data`/`--data-file` provide the base object; `--arg` pairs override it.
fn build_body(args: &InvokeArgs) -> Result<Value, String> {
    let base = match (&args.data, &args.data_file) {
        (Some(data), _) => {
            serde_json::from_str(data).map_err(|e| format!("Invalid JSON in --data: {e}"))?
        }
        (None, Some(path)) => read_json_from_file(path)?,
        (None, None) => Value::Object(Map::new()),
    };
    let Value::Object(mut body) = base else {
        return Err("Tool arguments must be a JSON object".to_string());
    };
    body.extend(parse_args(&args.args)?);
    Ok(Value::Object(body))
}
