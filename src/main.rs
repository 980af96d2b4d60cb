use codegen_pipeline::{api, config::Config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting codegen-pipeline (model={}, planning={})",
        config.model,
        config.enable_planning
    );

    api::serve(config).await
}
