use crate::config::model::Config;

pub fn load_config() -> Result<Config, anyhow::Error> {
    load_config_from_path("conduit.toml")
}

/// 读取 TOML 配置并完成校验
pub fn load_config_from_path(config_path: &str) -> Result<Config, anyhow::Error> {
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", config_path, e))?;
    let config = parse_config(&config_str)?;
    tracing::info!(
        "Loaded config from {} ({} services, {} operations)",
        config_path,
        config.services.len(),
        config.operations.len()
    );
    Ok(config)
}

pub fn parse_config(config_str: &str) -> Result<Config, anyhow::Error> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}
