use clap::Parser;

use crashpad_uploader::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose, cli.log_file.as_deref());

    match cli::run(cli).await {
        Ok(result) => {
            println!(
                "Upload complete: {} successful, {} failed",
                result.succeeded, result.failed
            );
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("[ERROR] {e:#}");
            std::process::exit(1);
        }
    }
}
