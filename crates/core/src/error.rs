use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("could not read config file `{path}`: {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config: {0}")]
    ParseConfig(#[from] toml::de::Error),
}
