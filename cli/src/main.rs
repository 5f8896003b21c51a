use std::process::ExitCode;

use clap::Parser;
use presentation::cli::{Cli, CliApp};
use presentation::output::print_error;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match CliApp::new(&cli) {
        Ok(mut app) => app.run(cli).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}
