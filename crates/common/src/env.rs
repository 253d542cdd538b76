//! Credential resolution from environment variables and key files

use std::path::Path;

use crate::{Error, Result, Secret};

/// Read an environment variable, treating unset and blank values alike.
pub fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Resolve a credential: the env var wins, then the optional file.
///
/// File contents are trimmed; an empty file counts as absent. Returns
/// `Ok(None)` when neither source yields a value.
pub fn secret_from_env_or_file(
    env_var: &str,
    file: Option<&Path>,
) -> Result<Option<Secret<String>>> {
    if let Some(value) = non_empty_env(env_var) {
        return Ok(Some(Secret::new(value)));
    }
    let Some(path) = file else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let value = contents.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(Secret::new(value.to_owned())))
}
