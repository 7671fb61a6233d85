use std::path::PathBuf;
use std::process::ExitCode;

use atms_client::client::{AuthClient, OutboundRequest};
use atms_client::config::{config_schema, load_config, DEFAULT_CONFIG_PATH};
use atms_client::error::ClientError;
use atms_client::navigation::Navigation;
use atms_client::startup::build_session;
use atms_client::utils::init_logging;
use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing::error;

/// Command-line access to the training management API with a persisted session.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file; `ATMS_*` environment variables override it.
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the JSON schema of the configuration file.
    Schema,
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands that need a configured client.
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Sign in and store the issued tokens.
    Login {
        #[arg(long)]
        username: String,
        #[arg(long, env = "ATMS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session.
    Logout,
    /// Show the user record of the stored session.
    Whoami,
    /// Send an authenticated request and print the response body.
    Request {
        /// HTTP method, e.g. GET or POST.
        method: Method,
        /// Path below the configured base URL, e.g. /courses.
        path: String,
        /// JSON request body.
        #[arg(long)]
        data: Option<String>,
        /// Query parameters as key=value, repeatable.
        #[arg(long = "query", short = 'q', value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn print_schema() -> Result<(), ClientError> {
    let schema = config_schema().map_err(|e| ClientError::Decode(e.to_string()))?;
    println!("{}", schema);
    Ok(())
}

async fn run(command: SessionCommand, client: &AuthClient) -> Result<(), ClientError> {
    match command {
        SessionCommand::Login { username, password } => {
            match client.login(&username, &password).await? {
                Some(user) => println!("Signed in as {} ({:?})", user.username, user.role),
                None => println!("Signed in as {}", username),
            }
        }
        SessionCommand::Logout => client.logout().await?,
        SessionCommand::Whoami => match client.current_user().await? {
            Some(user) => println!(
                "{}",
                serde_json::to_string_pretty(&user).map_err(|e| ClientError::Decode(e.to_string()))?
            ),
            None => println!("Not signed in"),
        },
        SessionCommand::Request {
            method,
            path,
            data,
            query,
        } => {
            let mut request = OutboundRequest::new(method, path);
            for (key, value) in query {
                request = request.with_query(key, value);
            }
            if let Some(data) = data {
                let body = serde_json::from_str(&data)
                    .map_err(|e| ClientError::InvalidRequest(format!("--data is not JSON: {}", e)))?;
                request = request.with_json_value(body);
            }
            let response = client.send(request).await?;
            println!("{}", response.text());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The schema is needed to write a config, so it must not require one.
    let command = match cli.command {
        Command::Schema => {
            return match print_schema() {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error rendering schema: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Session(command) => command,
    };

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    let session = match build_session(&config).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let explicit_logout = matches!(command, SessionCommand::Logout);
    let outcome = run(command, &session.client).await;

    match session.navigator.last() {
        Some(Navigation::Login { .. }) if !explicit_logout => {
            eprintln!("Session ended. Sign in again with `atms-client login`.")
        }
        Some(Navigation::Reload { .. }) => {
            eprintln!("Too many failed refreshes; session reset. Sign in again with `atms-client login`.")
        }
        _ => {}
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
