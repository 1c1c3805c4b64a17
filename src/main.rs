use idea_pipeline::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    idea_pipeline::run(config).await?;
    Ok(())
}
