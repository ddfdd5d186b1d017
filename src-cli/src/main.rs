use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    registra_cli::run().await
}
