use clap::Parser;
use std::io::Write;
use std::process;
use url_to_image::{cli::Cli, output};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.timestamps);

    let code = match url_to_image::cli::run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", output::format_error(&e));
            e.exit_code()
        }
    };

    // Give pending output a chance to flush before the process goes away.
    tokio::task::yield_now().await;
    std::io::stdout().flush().ok();
    std::io::stderr().flush().ok();
    process::exit(code);
}

fn init_logging(verbose: bool, timestamps: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = if verbose {
        EnvFilter::new("debug,chromiumoxide=warn,tungstenite=warn")
    } else {
        let base = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "off".into());
        EnvFilter::new(format!("{},chromiumoxide=off", base))
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    if timestamps {
        builder.with_timer(fmt::time::Uptime::default()).init();
    } else {
        builder.without_time().init();
    }
}
