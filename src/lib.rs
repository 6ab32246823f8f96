pub mod ai;
pub mod capture;
pub mod console;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod session;
pub mod settings;
pub mod stats;

pub use error::InspectorError;
pub use orchestrator::{Inspector, InspectorEvent, Outcome};

use clap::Parser;

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = console::Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(console::run(cli)) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
