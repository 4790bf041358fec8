use clap::Subcommand;

use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum InvocationCommands {
    /// List in-flight invocations, including ones waiting for their tool
    List,
    /// Stop an in-flight invocation (kills its worker's process group)
    Stop {
        /// Invocation id, as printed by `invocations list`
        id: String,
    },
}

pub async fn run(api_url: &str, command: InvocationCommands) -> i32 {
    match command {
        InvocationCommands::List => {
            api_request(api_url, reqwest::Method::GET, "/invocations", None, false).await
        }
        InvocationCommands::Stop { id } => {
            if !is_valid_id(&id) {
                exit_error(
                    &format!("Invalid invocation id: '{id}'"),
                    Some("Use the invocation_id from `toolgate-cli invocations list`."),
                );
            }
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/invocations/{id}/stop"),
                None,
                false,
            )
            .await
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::is_valid_id;

    #[test]
    fn ids_must_be_path_safe() {
        assert!(is_valid_id("01927c3e-5b1a-7c4e-9f00-1a2b3c4d5e6f"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../healthz"));
        assert!(!is_valid_id("a b"));
    }
}
