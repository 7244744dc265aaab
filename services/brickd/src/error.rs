use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io { path: String, source: std::io::Error },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum BrickdError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Reactor(#[from] bd_reactor::ReactorError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
