use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the edbg workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build {
        /// Build with optimizations
        #[arg(long)]
        release: bool,
    },
    /// Run the edbg CLI, forwarding any extra arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run all workspace tests
    Test,
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build { release } => {
            println!("Building workspace...");
            let mut args = vec!["build", "--workspace"];
            if *release {
                args.push("--release");
            }
            cargo(&args, "Build")?;
        }
        Commands::Run { args } => {
            println!("Running edbg...");
            let mut cargo_args = vec!["run", "-p", "edbg-cli", "--"];
            cargo_args.extend(args.iter().map(String::as_str));
            cargo(&cargo_args, "Run")?;
        }
        Commands::Test => {
            println!("Testing workspace...");
            cargo(&["test", "--workspace"], "Test")?;
        }
    }

    Ok(())
}
