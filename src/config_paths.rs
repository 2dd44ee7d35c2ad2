//! Directory lookup in the repository's session descriptor.
//!
//! The descriptor only has to hold flat `key: value` lines. Values are either
//! absolute (leading `/` or a drive letter) or relative to the repository, and
//! every path handed back uses `/` whatever OS the target runs.

use crate::context::MountSpec;
use crate::transport::{Transport, TransportError, path_join};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Descriptor {0} does not exist")]
    DescriptorMissing(String),
    #[error("Key '{key}' not found in {descriptor}")]
    NotFound { key: String, descriptor: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResolveError::NotFound { .. } | ResolveError::DescriptorMissing(_)
        )
    }
}

/// A descriptor key resolved to a directory on the execution target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub key: String,
    pub host_path: String,
    pub container_path: String,
    /// True when the descriptor lacked the key and the configured default was used
    pub defaulted: bool,
}

pub struct ConfigPathResolver<'a> {
    transport: &'a Transport,
}

impl<'a> ConfigPathResolver<'a> {
    pub fn new(transport: &'a Transport) -> Self {
        Self { transport }
    }

    /// Absolute path for `key` read from the descriptor at `descriptor_path`.
    pub async fn resolve(
        &self,
        descriptor_path: &str,
        key: &str,
        base_dir: &str,
    ) -> Result<String, ResolveError> {
        let content = self
            .transport
            .read_file(descriptor_path)
            .await?
            .ok_or_else(|| ResolveError::DescriptorMissing(descriptor_path.to_string()))?;

        let value = find_value(&content, key).ok_or_else(|| ResolveError::NotFound {
            key: key.to_string(),
            descriptor: descriptor_path.to_string(),
        })?;
        Ok(resolve_value(&value, base_dir))
    }

    /// Resolve every configured mount, using its default when the descriptor
    /// does not name it. Mounts with neither are skipped with a warning.
    pub async fn resolve_mounts(
        &self,
        repo_path: &str,
        descriptor_file: &str,
        mounts: &[MountSpec],
    ) -> Result<Vec<ResolvedMount>, ResolveError> {
        let descriptor = path_join(repo_path, descriptor_file);
        let mut resolved = Vec::new();

        for mount in mounts {
            let (host_path, defaulted) =
                match self.resolve(&descriptor, &mount.key, repo_path).await {
                    Ok(path) => (path, false),
                    Err(err) if err.is_not_found() => match &mount.default {
                        Some(default) => {
                            tracing::info!("{err}; using default '{default}'");
                            (resolve_value(default, repo_path), true)
                        }
                        None => {
                            tracing::warn!("{err}; not mounting {}", mount.container_path);
                            continue;
                        }
                    },
                    Err(err) => return Err(err),
                };

            resolved.push(ResolvedMount {
                key: mount.key.clone(),
                host_path,
                container_path: mount.container_path.clone(),
                defaulted,
            });
        }

        Ok(resolved)
    }
}

/// Value of the first non-comment `key:` line, without trailing comment or quotes.
pub fn find_value(content: &str, key: &str) -> Option<String> {
    let line = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find(|line| {
            line.strip_prefix(key)
                .is_some_and(|rest| rest.trim_start().starts_with(':'))
        })?;

    let raw = line[key.len()..].trim_start().strip_prefix(':')?;
    let value = strip_comment(raw).trim();
    let value = strip_quotes(value);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn strip_comment(value: &str) -> &str {
    let value = value.trim_start();
    if value.starts_with('#') {
        return "";
    }
    match value.find(" #").or_else(|| value.find("\t#")) {
        Some(index) => &value[..index],
        None => value,
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Leading `/`, or a drive letter followed by a separator.
pub fn is_absolute(value: &str) -> bool {
    if value.starts_with('/') || value.starts_with('\\') {
        return true;
    }
    let bytes = value.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// Absolute values only get their separators unified; relative values are
/// joined to `base_dir` and normalized.
pub fn resolve_value(value: &str, base_dir: &str) -> String {
    if is_absolute(value) {
        value.replace('\\', "/")
    } else {
        normalize(&format!("{base_dir}/{value}"))
    }
}

/// Lexical normalization: `/` separators, no empty or `.` segments, and `..`
/// folded into its parent without climbing above the root.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let rooted = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if is_drive(last) => {}
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                None if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if parts.len() == 1 && is_drive(parts[0]) {
        format!("{joined}/")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
