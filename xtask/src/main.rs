//! xtask for freeform development workflows.
//!
//! ## Available Tasks
//!
//! - `test-all` - Run the workspace tests with snapshot cleanup

use anyhow::Result;
use clap::{Parser, Subcommand};

mod test_all;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for freeform")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests with cleanup
    TestAll {
        #[command(subcommand)]
        action: test_all::Action,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::TestAll { action } => test_all::run(action),
    }
}
