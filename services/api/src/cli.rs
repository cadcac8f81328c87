use crate::demo::{run_demo, DemoArgs};
use crate::server;
use crate::watch::{run_watch, WatchArgs};
use clap::{Args, Parser, Subcommand};
use school_admissions::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "School Admissions",
    about = "Run the school admissions back office and its onboarding tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Follow an administrator's school verification until the dashboard unlocks
    Watch(WatchArgs),
    /// Walk through onboarding and applicant review against in-memory sample data
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Serve in-memory sample data instead of the configured backend
    #[arg(long)]
    pub(crate) sample_data: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Watch(args) => run_watch(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
