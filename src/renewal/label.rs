// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet label parsing (`username@organization`).

use crate::error::LifecycleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletLabel {
    pub username: String,
    pub organization: String,
}

impl WalletLabel {
    /// Split a label on its single `@`. Both halves must be non-empty and
    /// free of whitespace.
    pub fn parse(label: &str) -> Result<Self, LifecycleError> {
        let invalid = || LifecycleError::InvalidLabel(label.to_string());

        let (username, organization) = label.split_once('@').ok_or_else(invalid)?;
        if username.is_empty()
            || organization.is_empty()
            || organization.contains('@')
            || label.chars().any(char::is_whitespace)
        {
            return Err(invalid());
        }

        Ok(Self {
            username: username.to_string(),
            organization: organization.to_string(),
        })
    }
}

impl std::fmt::Display for WalletLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.username, self.organization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_username_and_organization() {
        let label = WalletLabel::parse("alice@org1").unwrap();
        assert_eq!(label.username, "alice");
        assert_eq!(label.organization, "org1");
        assert_eq!(label.to_string(), "alice@org1");
    }

    #[test]
    fn rejects_malformed_labels() {
        for bad in ["alice", "@org1", "alice@", "a@b@c", "al ice@org1", ""] {
            assert!(
                matches!(WalletLabel::parse(bad), Err(LifecycleError::InvalidLabel(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
