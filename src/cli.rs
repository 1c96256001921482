use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "applybox")]
#[command(about = "Job-application orchestration service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatcher: HTTP/SMS surfaces, store, and result drains
    Dispatcher,

    /// Run an automation worker consuming job_application tasks
    Worker,

    /// Print a freshly generated credential encryption key and exit
    GenKey,
}
