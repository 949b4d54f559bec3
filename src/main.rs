mod cli;
mod compose;
mod dunning;
mod error;
mod export;
mod fmt;
mod mailer;
mod models;
mod preflight;
mod settings;
mod tracking;

use clap::Parser;

use cli::{Cli, Commands, PreflightCommands};

/// Log to dunn.log in the data dir when it exists, stderr otherwise.
fn init_logging() {
    let settings = settings::load_settings();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(settings.log_path())
    {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    let _ = builder.try_init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Run {
            export,
            format,
            debug,
            transaction,
            yes,
            no_input,
            no_review,
        } => cli::run::run(
            export.as_deref(),
            format.as_deref(),
            debug,
            transaction,
            yes,
            no_input,
            no_review,
        ),
        Commands::Preflight { command } => match command {
            PreflightCommands::Build { export, format } => {
                cli::preflight::build(export.as_deref(), format.as_deref())
            }
            PreflightCommands::Diff { export, format } => {
                cli::preflight::diff(export.as_deref(), format.as_deref())
            }
        },
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
