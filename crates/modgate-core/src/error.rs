// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module system and the interception pipeline

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for module system operations
pub type Result<T> = std::result::Result<T, ModgateError>;

/// The access-control rule that rejected a module request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyRule {
    /// The identifier is on the blacklist
    Blacklisted,
    /// A whitelist is configured and the identifier is not on it
    NotWhitelisted,
    /// External modules are disallowed and the identifier is not a native module
    ExternalDisallowed,
}

impl DenyRule {
    /// Stable short name of the rule
    pub fn as_str(self) -> &'static str {
        match self {
            DenyRule::Blacklisted => "blacklisted",
            DenyRule::NotWhitelisted => "not-whitelisted",
            DenyRule::ExternalDisallowed => "external-disallowed",
        }
    }
}

impl fmt::Display for DenyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while loading modules
#[derive(Debug, Error)]
pub enum ModgateError {
    /// Empty or non-text module request
    #[error("Invalid module identifier: {0}")]
    InvalidIdentifier(String),

    /// Malformed file suffix passed to an extension registration
    #[error("Invalid extension '{0}': extensions start with a dot, for example .js")]
    InvalidExtension(String),

    /// Unknown lifecycle event name
    #[error("Unknown lifecycle event '{0}'")]
    InvalidEvent(String),

    /// Module rejected by the access policy
    #[error("Use of module '{identifier}' is restricted ({rule})")]
    AccessDenied {
        /// Requested identifier
        identifier: String,
        /// Rule that triggered the denial
        rule: DenyRule,
    },

    /// Module not found
    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),

    /// Compile step failed
    #[error("Failed to compile '{}': {reason}", location.display())]
    Compilation {
        /// Module location
        location: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Module kind the loader cannot execute
    #[error("Unsupported module '{module}': {reason}")]
    UnsupportedModule {
        /// Module location
        module: String,
        /// Reason for failure
        reason: String,
    },

    /// File system error
    #[error("File system error: {0}")]
    Fs(#[from] std::io::Error),

    /// Policy file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Type error (wrong argument type)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Generic error with message
    #[error("{0}")]
    Generic(String),
}

impl ModgateError {
    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a module not found error
    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound(module.into())
    }

    /// Create an access denied error
    pub fn access_denied(identifier: impl Into<String>, rule: DenyRule) -> Self {
        Self::AccessDenied {
            identifier: identifier.into(),
            rule,
        }
    }

    /// Create a compilation error
    pub fn compilation(location: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Compilation {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// The deny rule, when this is an access denial
    pub fn deny_rule(&self) -> Option<DenyRule> {
        match self {
            Self::AccessDenied { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ModgateError {
    fn from(err: toml::de::Error) -> Self {
        ModgateError::Config(err.to_string())
    }
}

impl From<&str> for ModgateError {
    fn from(s: &str) -> Self {
        ModgateError::Generic(s.to_string())
    }
}

impl From<String> for ModgateError {
    fn from(s: String) -> Self {
        ModgateError::Generic(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_rule_names() {
        assert_eq!(DenyRule::Blacklisted.to_string(), "blacklisted");
        assert_eq!(DenyRule::NotWhitelisted.to_string(), "not-whitelisted");
        assert_eq!(DenyRule::ExternalDisallowed.to_string(), "external-disallowed");
    }

    #[test]
    fn test_access_denied_message() {
        let err = ModgateError::access_denied("secretlib", DenyRule::Blacklisted);
        assert_eq!(
            err.to_string(),
            "Use of module 'secretlib' is restricted (blacklisted)"
        );
        assert_eq!(err.deny_rule(), Some(DenyRule::Blacklisted));
        assert_eq!(ModgateError::module_not_found("x").deny_rule(), None);
    }
}
