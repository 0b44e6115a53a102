#[tokio::main]
async fn main() {
    if let Err(e) = apismith::cli::run_main().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
