use std::fmt;

use crate::failover::CredentialEvent;

/// Last known state of one credential.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CredentialStatus {
    Unknown,
    Active,
    Failed { reason: String },
}

/// Per-credential status built from [`CredentialEvent`]s.
///
/// Feed it from [`crate::Relay::subscribe_credentials`]; it never looks at
/// logs or error strings to decide what happened.
#[derive(Clone, Debug)]
pub struct CredentialStatusBoard {
    statuses: Vec<CredentialStatus>,
    active: Option<usize>,
}

impl CredentialStatusBoard {
    pub fn new(credential_count: usize) -> Self {
        Self {
            statuses: vec![CredentialStatus::Unknown; credential_count],
            active: None,
        }
    }

    pub fn apply(&mut self, event: &CredentialEvent) {
        match event {
            CredentialEvent::Used { index } => {
                if let Some(slot) = self.statuses.get_mut(*index) {
                    *slot = CredentialStatus::Active;
                    self.active = Some(*index);
                }
            }
            CredentialEvent::Failed {
                index,
                status_code,
                message,
                ..
            } => {
                if let Some(slot) = self.statuses.get_mut(*index) {
                    let reason = match status_code {
                        Some(code) => format!("{code}: {message}"),
                        None => message.clone(),
                    };
                    *slot = CredentialStatus::Failed { reason };
                    if self.active == Some(*index) {
                        self.active = None;
                    }
                }
            }
        }
    }

    pub fn status(&self, index: usize) -> Option<&CredentialStatus> {
        self.statuses.get(index)
    }

    /// Credential that answered most recently and has not failed since.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.count(|s| matches!(s, CredentialStatus::Active))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, CredentialStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&CredentialStatus) -> bool) -> usize {
        self.statuses.iter().filter(|s| pred(s)).count()
    }
}

impl fmt::Display for CredentialStatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "credentials: {} total, {} active, {} failed",
            self.len(),
            self.active_count(),
            self.failed_count()
        )?;
        if let Some(index) = self.active {
            write!(f, ", using #{index}")?;
        }
        Ok(())
    }
}
