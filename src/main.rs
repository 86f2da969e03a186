#[tokio::main]
async fn main() -> anyhow::Result<()> {
    timevault_lib::run().await
}
