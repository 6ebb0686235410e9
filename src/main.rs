use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    veilbox_lib::init_logging();
    veilbox_lib::run(veilbox_lib::Cli::parse()).await
}
