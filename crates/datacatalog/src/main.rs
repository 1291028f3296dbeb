//! Datacatalog CLI
//!
//! Binary name: `datacatalog`

use std::process;

use datacatalog::cli::{
    build_cli,
    handlers::{dispatch, exit_code, format_error},
};
use datacatalog_core::Error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();

    // Dropping `dispatch` stops waiting on the store, it does not roll anything back.
    let cli_result = tokio::select! {
        result = dispatch(&matches) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, abandoning request");
            Err(Error::unknown(
                "interrupted; the outcome is unknown, run `datacatalog get` to learn it",
            )
            .into())
        }
    };

    if let Err(err) = cli_result {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("{}", format_error(&err));
        }

        #[allow(clippy::exit)]
        process::exit(exit_code(&err));
    }
}
