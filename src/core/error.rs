use thiserror::Error;

#[derive(Error, Debug)]
pub enum BattleError {
    #[error("Corrupt save: {0}")]
    CorruptSave(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Save format error: {0}")]
    SaveFormat(#[from] bincode::Error),

    #[error("Unsupported save version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u8, supported: u8 },

    #[error("Data parse error: {0}")]
    DataParse(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, BattleError>;
