#[tokio::main]
async fn main() {
    if let Err(e) = lumen_pipeline::app::run().await {
        eprintln!("\nError: {:#}\n", e);
        std::process::exit(1);
    }
}
