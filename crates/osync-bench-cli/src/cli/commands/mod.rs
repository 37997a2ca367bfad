pub mod doctor;
pub mod run;

use crate::cli::args::{Cli, Command};

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::dispatch(args).await,
        Command::Doctor(args) => doctor::dispatch(args).await,
    }
}
