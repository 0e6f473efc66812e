use crate::errors::RelayError;

/// Env var holding the ordered upstream credentials.
pub const API_KEYS_ENV: &str = "CHAT_RELAY_API_KEYS";

/// One upstream authorization token and its position in the pool.
///
/// Immutable once loaded. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    token: String,
}

impl Credential {
    /// Position in the pool (zero based).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw token, for providers to place on the wire.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Ordered list of interchangeable credentials.
///
/// Read-only after construction; sessions share it through an `Arc` without
/// locking.
#[derive(Clone, Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    /// Builds a pool from tokens in priority order.
    ///
    /// Blank tokens are rejected; so is an empty pool.
    pub fn new<I, S>(tokens: I) -> Result<Self, RelayError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut credentials = Vec::new();
        for (index, token) in tokens.into_iter().enumerate() {
            let token = token.into().trim().to_string();
            if token.is_empty() {
                return Err(RelayError::Config(format!(
                    "credential {index} must not be empty"
                )));
            }
            credentials.push(Credential { index, token });
        }
        if credentials.is_empty() {
            return Err(RelayError::Config(
                "credential pool must contain at least one credential".into(),
            ));
        }
        Ok(Self { credentials })
    }

    /// Builds a pool from `CHAT_RELAY_API_KEYS`.
    pub fn from_env() -> Result<Self, RelayError> {
        let raw = std::env::var(API_KEYS_ENV).unwrap_or_default();
        let tokens = parse_key_list(&raw);
        if tokens.is_empty() {
            return Err(RelayError::Config(format!(
                "missing {API_KEYS_ENV} (comma separated upstream keys)"
            )));
        }
        Self::new(tokens)
    }

    /// Remaining credentials starting at `start`, in pool order.
    pub fn next_from(&self, start: usize) -> impl Iterator<Item = &Credential> + '_ {
        self.credentials.iter().skip(start)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

/// Splits a key list on commas, semicolons or newlines, dropping blanks.
pub fn parse_key_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_from_walks_remaining_credentials_in_order() {
        let pool = CredentialPool::new(["k0", "k1", "k2", "k3"]).expect("pool");
        let indices: Vec<usize> = pool.next_from(1).map(Credential::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(pool.next_from(4).count(), 0);
        assert_eq!(pool.next_from(0).next().map(Credential::token), Some("k0"));
    }

    #[test]
    fn empty_pool_and_blank_tokens_are_rejected() {
        assert!(matches!(
            CredentialPool::new(Vec::<String>::new()),
            Err(RelayError::Config(_))
        ));
        assert!(matches!(
            CredentialPool::new(["k0", "  "]),
            Err(RelayError::Config(msg)) if msg.contains("credential 1")
        ));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let pool = CredentialPool::new(["super-secret"]).expect("pool");
        let rendered = format!("{pool:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn key_list_accepts_mixed_separators() {
        assert_eq!(
            parse_key_list(" a, b;c\n\n d ,"),
            vec!["a".to_string(), "b".into(), "c".into(), "d".into()]
        );
    }
}
