use rn_bridge::{app, cli};

#[tokio::main]
async fn main() {
    if let Err(err) = app::run(cli::parse()).await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}
