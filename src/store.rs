//! Flat `KEY=VALUE` credential store
//!
//! The store is a human-editable settings file (usually `.env`). Loading keeps
//! every line in file order, including comments and blank lines, so that an
//! upsert only touches the keys it was given.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `prefix` is everything up to and including the first `=`
    Entry { key: String, prefix: String, value: String },
    /// Comments, blank lines and anything that is not an assignment
    Raw(String),
}

impl Line {
    fn parse(text: &str) -> Self {
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Line::Raw(text.to_string());
        }

        match text.split_once('=') {
            Some((key, value)) if is_valid_key(key.trim()) => Line::Entry {
                key: key.trim().to_string(),
                prefix: format!("{key}="),
                value: value.to_string(),
            },
            _ => Line::Raw(text.to_string()),
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            Line::Entry { key, .. } => Some(key),
            Line::Raw(_) => None,
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('#')
        && !key.contains('=')
        && !key.chars().any(char::is_whitespace)
}

/// Ordered key/value view of a credential file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRecord {
    lines: Vec<Line>,
}

impl CredentialRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse file content, one line at a time
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(Line::parse).collect(),
        }
    }

    /// Value of the first assignment to `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Keys in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(Line::key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys().any(|k| k == key)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Apply `updates` in order.
    ///
    /// An existing key has its value replaced in place and any later duplicate
    /// assignments of it dropped; a new key is appended after all existing
    /// lines. Lines for other keys are left as they were. Applying the same
    /// updates twice gives the same record as applying them once.
    pub fn upsert<I, K, V>(mut self, updates: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in updates {
            let (key, value) = (key.as_ref(), value.as_ref());
            if !is_valid_key(key) {
                return Err(Error::InvalidEntry(format!("'{key}' is not a valid key")));
            }
            if value.contains(['\n', '\r']) {
                return Err(Error::InvalidEntry(format!(
                    "value for '{key}' spans multiple lines"
                )));
            }

            let mut seen = false;
            self.lines.retain_mut(|line| match line {
                Line::Entry { key: k, value: v, .. } if k == key => {
                    if seen {
                        return false;
                    }
                    seen = true;
                    *v = value.to_string();
                    true
                }
                _ => true,
            });

            if !seen {
                self.lines.push(Line::Entry {
                    key: key.to_string(),
                    prefix: format!("{key}="),
                    value: value.to_string(),
                });
            }
        }

        Ok(self)
    }

    /// Drop every assignment to the given keys
    pub fn remove<K: AsRef<str>>(mut self, keys: &[K]) -> Self {
        self.lines.retain(|line| match line.key() {
            Some(k) => !keys.iter().any(|key| key.as_ref() == k),
            None => true,
        });
        self
    }
}

impl fmt::Display for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Entry { prefix, value, .. } => writeln!(f, "{prefix}{value}")?,
                Line::Raw(text) => writeln!(f, "{text}")?,
            }
        }
        Ok(())
    }
}

/// File-backed credential store at an explicit path
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record; a missing file is an empty record
    pub fn load(&self) -> Result<CredentialRecord> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(CredentialRecord::parse(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No credential file at {}, starting empty", self.path.display());
                Ok(CredentialRecord::new())
            }
            Err(e) => Err(Error::file_io(&self.path, e)),
        }
    }

    /// Overwrite the file with `record`.
    ///
    /// The content goes to a sibling temp file first and is renamed over the
    /// target, so a failed write never leaves a half-written store behind. The
    /// parent directory must already exist.
    pub fn persist(&self, record: &CredentialRecord) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| Error::InvalidConfig(format!("{} is not a file path", self.path.display())))?;
        let tmp_path = self
            .path
            .with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        let result = self.write_replacing(&tmp_path, &record.to_string());
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn write_replacing(&self, tmp_path: &Path, content: &str) -> Result<()> {
        fs::write(tmp_path, content).map_err(|e| Error::file_io(&self.path, e))?;

        match fs::metadata(&self.path) {
            Ok(existing) => fs::set_permissions(tmp_path, existing.permissions())
                .map_err(|e| Error::file_io(&self.path, e))?,
            Err(_) => {
                // Set restrictive permissions on Unix for a new file
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(tmp_path, fs::Permissions::from_mode(0o600))
                        .map_err(|e| Error::file_io(&self.path, e))?;
                }
            }
        }

        fs::rename(tmp_path, &self.path).map_err(|e| Error::file_io(&self.path, e))?;
        tracing::debug!("Wrote credential file {}", self.path.display());
        Ok(())
    }
}
