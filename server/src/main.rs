mod auth;
mod chart;
mod host;
mod scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
