//! One-time bypass codes.
//!
//! `saferun bypass-code` issues a 6-digit code with an expiry into
//! `~/.saferun/bypass.json`; the bypass channel consumes it. Each code works once.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CODE_LENGTH: usize = 6;

/// Where bypass codes live.
pub trait BypassStore: Send + Sync {
    /// Consume a code. `Ok(true)` only if the code existed, was unused and unexpired.
    fn consume(&self, code: &str, now: DateTime<Utc>) -> Result<bool>;
}

/// Whether `code` has the fixed bypass format (exactly six ASCII digits).
pub fn is_valid_format(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// A fresh random 6-digit code.
pub fn generate_code() -> String {
    let n = uuid::Uuid::new_v4().as_u128() % 10u128.pow(CODE_LENGTH as u32);
    format!("{:0width$}", n, width = CODE_LENGTH)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct IssuedCode {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CodeFile {
    #[serde(default)]
    codes: Vec<IssuedCode>,
}

/// Bypass codes in a JSON file.
pub struct FileBypassStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBypassStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue a new code valid for `ttl`. Expired codes are pruned on write.
    pub fn issue(&self, ttl: Duration, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>)> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.load()?;
        file.codes.retain(|c| c.expires_at > now);

        let code = loop {
            let candidate = generate_code();
            if !file.codes.iter().any(|c| c.code == candidate) {
                break candidate;
            }
        };
        let expires_at = now + ttl;
        file.codes.push(IssuedCode {
            code: code.clone(),
            expires_at,
        });
        self.save(&file)?;
        Ok((code, expires_at))
    }

    fn load(&self) -> Result<CodeFile> {
        if !self.path.exists() {
            return Ok(CodeFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read bypass codes: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(CodeFile::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt bypass code file: {}", self.path.display()))
    }

    fn save(&self, file: &CodeFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write bypass codes: {}", self.path.display()))
    }
}

impl BypassStore for FileBypassStore {
    fn consume(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        if !is_valid_format(code) {
            return Ok(false);
        }
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = self.load()?;
        let before = file.codes.len();
        let matched = file
            .codes
            .iter()
            .any(|c| c.code == code && c.expires_at > now);

        file.codes.retain(|c| c.code != code && c.expires_at > now);
        if matched || file.codes.len() != before {
            self.save(&file)?;
        }
        Ok(matched)
    }
}
