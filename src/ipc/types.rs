use std::path::PathBuf;

use crate::config::Config;
use crate::identity::CredentialHasher;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    pub hasher: CredentialHasher,
}

impl AppState {
    pub fn new(config: Config, hasher: CredentialHasher) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
            hasher,
        }
    }
}
