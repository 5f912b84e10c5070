use anyhow::{bail, Context, Result};
use std::env;

#[derive(Clone)]
pub struct ProxyConfig {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub target_url: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self> {
        let key = parse_16_bytes("LINSPIRER_KEY")?;
        let iv = parse_16_bytes("LINSPIRER_IV")?;
        let jwt_secret =
            env::var("LINSPIRER_JWT_SECRET").context("LINSPIRER_JWT_SECRET must be set")?;

        let target_url = env::var("LINSPIRER_TARGET_URL")
            .unwrap_or_else(|_| "https://cloud.linspirer.com:883".to_string());
        let db_path =
            env::var("LINSPIRER_DB_PATH").unwrap_or_else(|_| "./data/linspirer.db".to_string());
        let host = env::var("LINSPIRER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("LINSPIRER_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        Ok(Self { key, iv, target_url, db_path, host, port, jwt_secret })
    }
}

fn parse_16_bytes(var: &str) -> Result<[u8; 16]> {
    let raw = env::var(var).with_context(|| format!("{var} must be set"))?;
    let bytes = raw.into_bytes();
    if bytes.len() != 16 {
        bail!("{var} must be exactly 16 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes);
    Ok(out)
}
