use clap::Parser;
use sqlprompt::cli::Args;
use sqlprompt::cli_core::CliCore;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let status = match CliCore::run_with_args(args).await {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(status);
}
