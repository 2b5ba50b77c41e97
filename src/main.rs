#[tokio::main]
async fn main() -> anyhow::Result<()> {
    voicestream::run().await
}
