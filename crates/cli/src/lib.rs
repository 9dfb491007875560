pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "querydesk",
    about = "Querydesk operator CLI",
    long_about = "Inspect configuration, list configured datasets, and check candidate SQL \
                  against tenant-isolation rules without touching the database.",
    after_help = "Examples:\n  querydesk config\n  querydesk datasets\n  querydesk check-sql \
                  --tenant 42 --sql \"SELECT * FROM sales WHERE client_id = 42\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with secrets redacted")]
    Config,
    #[command(about = "List configured datasets with their isolation strategies")]
    Datasets,
    #[command(
        name = "check-sql",
        about = "Validate a SQL statement against a dataset's tenant-isolation rules"
    )]
    CheckSql {
        #[arg(long, help = "Dataset id (defaults to the configured default dataset)")]
        dataset: Option<String>,
        #[arg(long, help = "Tenant id the statement must be scoped to")]
        tenant: String,
        #[arg(long, help = "The SQL statement to validate")]
        sql: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Datasets => commands::datasets::run(),
        Command::CheckSql { dataset, tenant, sql } => {
            commands::check_sql::run(dataset.as_deref(), &tenant, &sql)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
