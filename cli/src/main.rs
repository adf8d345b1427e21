use clap::Parser;
use kala_cli::Cli;
use kala_cli::EXIT_CODE_INVALID_CONFIG;
use kala_cli::config::ConfigLoadError;

#[tokio::main]
async fn main() {
    kala_cli::init_logging();
    let cli = Cli::parse();

    if let Err(err) = kala_cli::run_main(cli).await {
        if err.downcast_ref::<ConfigLoadError>().is_some() {
            eprintln!("Config validation error: {err}");
            std::process::exit(EXIT_CODE_INVALID_CONFIG);
        }
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
