use certkeeper::cli::Cli;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let logs = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if cli.json_logs {
        logs.json().init();
    } else {
        logs.init();
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(cli.run()) {
        tracing::error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
