#[tokio::main]
async fn main() -> anyhow::Result<()> {
    recall_authority::run().await
}
