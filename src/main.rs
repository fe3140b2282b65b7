use llm_gateway_scheduler::config::DEFAULT_CONFIG_PATH;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    llm_gateway_scheduler::start_server(config_path).await?;
    Ok(())
}
