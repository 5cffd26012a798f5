use anyhow::{Context, Result};
use std::io::Read;
use std::path::PathBuf;

use crate::archive::paths::resolve_paths;
use crate::archive::token::{TokenCipher, write_new_key};
use crate::commands::CommandReport;

#[derive(Debug, Clone, Default)]
pub struct GenerateKeyOptions {
    pub key_file: Option<PathBuf>,
}

pub fn generate(opts: &GenerateKeyOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("generate-key");
    let key_file = match &opts.key_file {
        Some(path) => path.clone(),
        None => resolve_paths()?.key_file,
    };

    if key_file.exists() {
        report.issue(format!(
            "key file {} already exists; refusing to overwrite",
            key_file.display()
        ));
        return Ok(report);
    }
    write_new_key(&key_file)?;
    report.detail(format!("key_file={}", key_file.display()));
    Ok(report)
}

#[derive(Debug, Clone, Default)]
pub struct EncryptTokenOptions {
    pub token: Option<String>,
}

pub fn encrypt(opts: &EncryptTokenOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("encrypt-token");

    let token = match &opts.token {
        Some(token) => token.trim().to_string(),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read token from stdin")?;
            raw.trim().to_string()
        }
    };
    if token.is_empty() {
        report.issue("empty token");
        return Ok(report);
    }

    let cipher = TokenCipher::from_key_file(&paths.key_file)?;
    report.detail(format!("key_file={}", paths.key_file.display()));
    report.detail(format!("api_token={}", cipher.encrypt(&token)));
    Ok(report)
}
