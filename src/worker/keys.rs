use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;

use super::commands::KeyDistributorType;

const ROUND_ROBIN_KEYS: usize = 10_000;
const KEY_LENGTH: usize = 7;

/// Random alphanumeric string used for keys and generated names.
#[must_use]
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Per send-loop key source.
#[derive(Debug, Clone)]
pub enum KeyDistributor {
    NoKey,
    RoundRobin { keys: Arc<Vec<String>>, next: usize },
    RandomNano,
}

impl KeyDistributor {
    #[must_use]
    pub fn build(kind: KeyDistributorType) -> Self {
        match kind {
            KeyDistributorType::NoKey => KeyDistributor::NoKey,
            KeyDistributorType::KeyRoundRobin => KeyDistributor::RoundRobin {
                keys: Arc::new(
                    (0..ROUND_ROBIN_KEYS)
                        .map(|_| random_token(KEY_LENGTH))
                        .collect(),
                ),
                next: 0,
            },
            KeyDistributorType::RandomNano => KeyDistributor::RandomNano,
        }
    }

    pub fn next_key(&mut self) -> Option<String> {
        match self {
            KeyDistributor::NoKey => None,
            KeyDistributor::RoundRobin { keys, next } => {
                let key = keys.get(*next).cloned();
                *next = next.saturating_add(1).checked_rem(keys.len()).unwrap_or(0);
                key
            }
            KeyDistributor::RandomNano => Some(random_token(KEY_LENGTH)),
        }
    }
}
