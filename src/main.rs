mod cli;
mod core;
mod interfaces;
mod logging;
mod platform;
#[cfg(test)]
mod test_utils;

use crate::core::terminal;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        terminal::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
