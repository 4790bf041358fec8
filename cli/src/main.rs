use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::invocations::InvocationCommands;
use commands::invoke::InvokeArgs;

#[derive(Parser)]
#[command(name = "toolgate-cli", version, about = "Toolgate CLI: discover and invoke gateway tools")]
struct Cli {
    /// Gateway base URL
    #[arg(long, env = "TOOLGATE_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway liveness
    Health,
    /// Show the tool manifest
    Tools {
        /// Skip pretty-printing (raw JSON for piping)
        #[arg(long)]
        raw: bool,
    },
    /// Invoke a tool and wait for its result
    Invoke(InvokeArgs),
    /// Inspect or stop in-flight invocations
    Invocations {
        #[command(subcommand)]
        command: InvocationCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Tools { raw } => commands::tools::run(&cli.api_url, raw).await,
        Commands::Invoke(args) => commands::invoke::run(&cli.api_url, args).await,
        Commands::Invocations { command } => commands::invocations::run(&cli.api_url, command).await,
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn invoke_collects_repeated_args() {
        let cli = Cli::try_parse_from([
            "toolgate-cli",
            "--api-url",
            "http://gateway:8080",
            "invoke",
            "execute_powershell_assessment",
            "--arg",
            "resourceGroups=rg-a",
            "-a",
            "resourceGroups=rg-b",
        ])
        .expect("arguments should parse");
        assert_eq!(cli.api_url, "http://gateway:8080");
        match cli.command {
            Commands::Invoke(args) => {
                assert_eq!(args.tool, "execute_powershell_assessment");
                assert_eq!(args.args.len(), 2);
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn data_and_data_file_conflict() {
        let parsed = Cli::try_parse_from([
            "toolgate-cli", "invoke", "t", "--data", "{}", "--data-file", "args.json",
        ]);
        assert!(parsed.is_err());
    }
}
