use std::io;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),
    #[error("db error: {0}")]
    Db(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Db(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Db(format!("payload encode/decode: {err}"))
    }
}
