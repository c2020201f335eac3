use std::fs;
use std::path::Path;

use crate::error::{MergeError, Result};
use crate::merge::MergeScope;
use crate::schema::MAX_QUERY_PARAMS;

/// Longest accepted conversation or contact identity
pub const MAX_IDENTITY_LEN: usize = 256;

/// Validation utilities for paths, identities and merge selections
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a database path. With `must_exist`, the path has to name an
    /// existing regular file.
    pub fn validate_database_path(path: &Path, must_exist: bool) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(MergeError::InvalidInput("Database path cannot be empty".to_string()));
        }

        // Check path length
        if path.to_string_lossy().len() > 4096 {
            return Err(MergeError::InvalidInput("Database path too long (max 4096 characters)".to_string()));
        }

        if must_exist {
            let metadata = fs::metadata(path)
                .map_err(|e| MergeError::access(path.display().to_string(), format!("cannot open file: {e}")))?;
            if !metadata.is_file() {
                return Err(MergeError::InvalidInput(format!(
                    "Database path is not a file: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Reject comparing a database with itself
    pub fn validate_distinct(left: &Path, right: &Path) -> Result<()> {
        let same = match (fs::canonicalize(left), fs::canonicalize(right)) {
            (Ok(l), Ok(r)) => l == r,
            _ => left == right,
        };
        if same {
            return Err(MergeError::InvalidInput(format!(
                "Cannot compare {} with itself",
                left.display()
            )));
        }
        Ok(())
    }

    /// Validate a conversation or contact identity
    pub fn validate_identity(identity: &str) -> Result<()> {
        if identity.trim().is_empty() {
            return Err(MergeError::InvalidInput("Identity cannot be empty".to_string()));
        }

        if identity.chars().count() > MAX_IDENTITY_LEN {
            return Err(MergeError::InvalidInput(format!(
                "Identity too long (max {MAX_IDENTITY_LEN} characters)"
            )));
        }

        // Check for potentially dangerous characters
        if identity.contains('\0') || identity.contains('\r') || identity.contains('\n') {
            return Err(MergeError::InvalidInput("Identity contains invalid characters".to_string()));
        }

        Ok(())
    }

    /// Validate an explicit merge selection
    pub fn validate_scope(scope: &MergeScope) -> Result<()> {
        match scope {
            MergeScope::All => Ok(()),
            MergeScope::Conversations(identities) => {
                if identities.is_empty() {
                    return Err(MergeError::InvalidInput("No conversations selected".to_string()));
                }
                identities.iter().try_for_each(|i| Self::validate_identity(i))
            },
            MergeScope::Contacts { contacts, groups } => {
                if contacts.is_empty() && groups.is_empty() {
                    return Err(MergeError::InvalidInput("No contacts or contact groups selected".to_string()));
                }
                contacts.iter().try_for_each(|i| Self::validate_identity(i))?;
                if groups.iter().any(|g| g.trim().is_empty()) {
                    return Err(MergeError::InvalidInput("Contact group name cannot be empty".to_string()));
                }
                Ok(())
            },
        }
    }

    /// Validate a per-query bound parameter limit
    pub fn validate_query_params(limit: usize) -> Result<()> {
        if limit == 0 {
            return Err(MergeError::InvalidInput("Query parameter limit must be greater than 0".to_string()));
        }

        if limit > MAX_QUERY_PARAMS {
            return Err(MergeError::InvalidInput(format!(
                "Query parameter limit too large (max {MAX_QUERY_PARAMS})"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rules() {
        assert!(InputValidator::validate_identity("alice").is_ok());
        assert!(InputValidator::validate_identity("  ").is_err());
        assert!(InputValidator::validate_identity("a\nb").is_err());
        assert!(InputValidator::validate_identity(&"x".repeat(MAX_IDENTITY_LEN + 1)).is_err());
    }

    #[test]
    fn test_scope_rules() {
        assert!(InputValidator::validate_scope(&MergeScope::All).is_ok());
        assert!(InputValidator::validate_scope(&MergeScope::Conversations(Vec::new())).is_err());
        assert!(InputValidator::validate_scope(&MergeScope::Contacts {
            contacts: Vec::new(),
            groups: vec!["Friends".to_string()],
        })
        .is_ok());
    }

    #[test]
    fn test_query_param_limit() {
        assert!(InputValidator::validate_query_params(999).is_ok());
        assert!(InputValidator::validate_query_params(1000).is_err());
        assert!(InputValidator::validate_query_params(0).is_err());
    }
}
