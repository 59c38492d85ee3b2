//! Session name validation and the name -> branch / workspace derivation.

use std::path::{Path, PathBuf};

use crate::error::TrenchError;

pub const MAX_NAME_LEN: usize = 64;

/// Validate that a name is safe as a path component and in `<prefix><name>` branches.
pub fn validate_name(name: &str) -> Result<(), TrenchError> {
    let invalid = |reason: &str| TrenchError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 64 characters"));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(invalid("must not start with '-' or '.'"));
    }
    if name.ends_with(".lock") || name.contains("..") {
        return Err(invalid("must not contain '..' or end with '.lock'"));
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(invalid("must be [A-Za-z0-9._-] only"));
    }
    Ok(())
}

pub fn branch_name(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

pub fn workspace_path(trenches_root: &Path, name: &str) -> PathBuf {
    trenches_root.join(name)
}
