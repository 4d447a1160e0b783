// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Access control: blacklist, then whitelist, then the external-module gate

use crate::error::{DenyRule, ModgateError, Result};
use crate::module_system::is_builtin;
use crate::policy::Policy;
use tracing::{debug, warn};

/// Outcome of the access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The module may load
    Allow,
    /// The module is rejected by a rule
    Deny(DenyRule),
}

/// Decide whether `identifier` may load under `policy`. First match wins.
pub fn check_access(identifier: &str, policy: &Policy) -> AccessDecision {
    if policy.is_blacklisted(identifier) {
        return AccessDecision::Deny(DenyRule::Blacklisted);
    }
    if !policy.whitelist().is_empty() && !policy.is_whitelisted(identifier) {
        return AccessDecision::Deny(DenyRule::NotWhitelisted);
    }
    if !policy.allows_external_modules() && !is_builtin(identifier) {
        return AccessDecision::Deny(DenyRule::ExternalDisallowed);
    }
    AccessDecision::Allow
}

/// [`check_access`] as a pipeline stage
pub fn enforce(identifier: &str, policy: &Policy) -> Result<()> {
    match check_access(identifier, policy) {
        AccessDecision::Allow => {
            debug!("Access granted for {}", identifier);
            Ok(())
        }
        AccessDecision::Deny(rule) => {
            warn!("Denied load of '{}' ({})", identifier, rule);
            Err(ModgateError::access_denied(identifier, rule))
        }
    }
}
