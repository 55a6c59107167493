#![cfg(not(tarpaulin_include))]

use calculations::api_client::{ApiError, CalculationApi, HttpApi};
use calculations::calculation::{Calculation, format_number};
use calculations::service::{CalculationCreate, CalculationUpdate};
use calculations::session::{self, ClientSession};
use calculations::view::{CalculationView, DeleteOutcome, Navigation, VIEW_ROUTE_PREFIX};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "calc-cli", version, about = "Terminal client for the calculations server")]
struct Cli {
    /// Base URL of the server
    #[arg(long, env = "CALC_SERVER", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Bearer token from an earlier login
    #[arg(long, env = "CALC_TOKEN", conflicts_with = "username")]
    token: Option<String>,

    /// Log in with this username or email before running the command
    #[arg(long, env = "CALC_USERNAME", requires = "password")]
    username: Option<String>,

    #[arg(long, env = "CALC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and print the issued token
    Login,
    /// Revoke the current token
    Logout,
    /// List your calculations
    List,
    /// Create a calculation, e.g. `create addition 2 3`
    Create {
        kind: String,
        #[arg(required = true, allow_negative_numbers = true)]
        inputs: Vec<f64>,
    },
    /// Change the type and/or inputs of a calculation
    Update {
        id: Uuid,
        #[arg(long = "type")]
        kind: Option<String>,
        /// Comma-separated inputs
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        inputs: Option<Vec<f64>>,
    },
    /// Show one calculation
    View { id: String },
    /// Delete a calculation after confirmation
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ApiError::Unauthorized) => {
            eprintln!("Error: not logged in or session expired; pass --username/--password");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), ApiError> {
    let session = session::global();
    let api = HttpApi::new(cli.server.clone(), session.clone());

    if let Some(token) = cli.token {
        session.init(ClientSession::from_token(token));
    } else if let (Some(username), Some(password)) = (&cli.username, &cli.password) {
        api.login(username, password).await?;
    }

    match cli.command {
        Command::Login => match session.current() {
            Some(current) => {
                println!("{}", current.token);
                if let Some(expires_at) = current.expires_at {
                    eprintln!("expires at {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
            None => return Err(ApiError::Unauthorized),
        },
        Command::Logout => {
            api.logout().await?;
            println!("Logged out");
        }
        Command::List => {
            let calculations = api.list().await?;
            if calculations.is_empty() {
                println!("No calculations yet");
            }
            for calc in &calculations {
                print_row(calc);
            }
        }
        Command::Create { kind, inputs } => {
            let calc = api.create(&CalculationCreate { kind, inputs }).await?;
            print_row(&calc);
        }
        Command::Update { id, kind, inputs } => {
            let calc = api.update(id, &CalculationUpdate { kind, inputs }).await?;
            print_row(&calc);
        }
        Command::View { id } => {
            let mut view = CalculationView::new(api, session);
            view.mount(&format!("{VIEW_ROUTE_PREFIX}{id}")).await;
            finish(&mut view).await?;
        }
        Command::Delete { id, yes } => {
            let mut view = CalculationView::new(api, session);
            view.mount(&format!("{VIEW_ROUTE_PREFIX}{id}")).await;
            if view.snapshot().navigation.is_some() {
                return finish(&mut view).await;
            }
            println!("{}\n", view.render());

            match view.delete(|calc| yes || confirm(calc)).await {
                DeleteOutcome::Cancelled => println!("Nothing deleted"),
                DeleteOutcome::Deleted | DeleteOutcome::Failed => finish(&mut view).await?,
            }
        }
    }

    Ok(())
}

/// Print the view and follow any navigation it requested.
async fn finish(view: &mut CalculationView<HttpApi>) -> Result<(), ApiError> {
    let navigation = view.wait_for_navigation().await;
    println!("{}", view.render());

    match navigation {
        Some(Navigation::Login) => Err(ApiError::Unauthorized),
        Some(Navigation::Listing) => {
            println!("-> {}", Navigation::Listing.route());
            Ok(())
        }
        None => Ok(()),
    }
}

fn confirm(calc: &Calculation) -> bool {
    print!("Delete {}? [y/N] ", calc.visual());
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim(), "y" | "Y" | "yes")
}

fn print_row(calc: &Calculation) {
    println!(
        "{}  {:<14}  {:<24}  result {}",
        calc.id,
        calc.kind.as_str(),
        calc.visual(),
        format_number(calc.result)
    );
}
