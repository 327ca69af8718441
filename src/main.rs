use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    bedrock_invoke::logging::init();
    bedrock_invoke::run().await
}
