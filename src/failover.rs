//! Credential pool and the controller that keeps a completion client alive
//! across rate limits and revoked keys.

use crate::completion::{CompletionClient, CompletionProvider, CompletionRequest};
use crate::constants::{PROBE_MAX_TOKENS, PROBE_SYSTEM_PROMPT, REPLY_MAX_TOKENS};
use crate::str_utils::mask_credential;
use crate::types::{RelayError, Result};
use std::sync::Arc;

/// Ordered, duplicate-free credentials. Insertion order is priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPool {
    credentials: Vec<String>,
    index: usize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<String>) -> Self {
        let mut pool = Self::default();
        for c in credentials {
            let _ = pool.push(c);
        }
        pool
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.credentials.len()
    }

    pub fn current(&self) -> Option<&str> {
        self.credentials.get(self.index).map(String::as_str)
    }

    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }

    fn push(&mut self, credential: String) -> bool {
        if self.credentials.contains(&credential) {
            return false;
        }
        self.credentials.push(credential);
        true
    }
}

/// Owns the pool and the single active client bound to `pool[index]`.
pub struct FailoverController {
    provider: Arc<dyn CompletionProvider>,
    pool: CredentialPool,
    active: Option<Arc<dyn CompletionClient>>,
}

impl FailoverController {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            pool: CredentialPool::default(),
            active: None,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn active_credential(&self) -> Option<&str> {
        self.active.as_ref().map(|c| c.credential())
    }

    pub fn has_active_client(&self) -> bool {
        self.active.is_some()
    }

    /// Replaces the pool and binds the first credential.
    pub fn activate(&mut self, pool: CredentialPool) -> Result<()> {
        self.pool = pool;
        self.reactivate()
    }

    /// Rebinds from the start of the current pool.
    pub fn reactivate(&mut self) -> Result<()> {
        self.pool.index = 0;
        self.active = None;
        match self.pool.current() {
            Some(credential) => {
                tracing::info!("[🧠] AI client initialized: {}", mask_credential(credential));
                self.active = Some(self.provider.bind(credential));
                Ok(())
            }
            None => {
                tracing::error!("[🧠] No credentials to initialize the AI client");
                Err(RelayError::NoCredentials.into())
            }
        }
    }

    pub fn rotate(&mut self) -> Result<()> {
        self.pool.index = self.pool.index.saturating_add(1);
        self.active = None;
        match self.pool.current() {
            Some(credential) => {
                tracing::info!("[🔄] Switched to next credential: {}", mask_credential(credential));
                self.active = Some(self.provider.bind(credential));
                Ok(())
            }
            None => {
                tracing::error!("[🧠] All credentials exhausted");
                Err(RelayError::PoolExhausted.into())
            }
        }
    }

    /// Appends a credential. Duplicates are rejected.
    pub fn add_credential(&mut self, credential: &str) -> Result<()> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(RelayError::InvalidInput("credential is empty".into()).into());
        }
        if !self.pool.push(credential.to_string()) {
            return Err(RelayError::InvalidInput("credential already present".into()).into());
        }
        tracing::info!("[🔑] Credential added: {}", mask_credential(credential));
        Ok(())
    }

    /// Removes the credential at `index` (0-based) and returns it. The active
    /// client follows the credential it was bound to; if that credential is
    /// the one removed, the client rebinds to whatever now sits at the index.
    pub fn remove_credential(&mut self, index: usize) -> Result<String> {
        if index >= self.pool.len() {
            return Err(RelayError::InvalidInput(format!("no credential at position {}", index + 1)).into());
        }
        let removed = self.pool.credentials.remove(index);
        tracing::info!("[🗑] Credential removed: {}", mask_credential(&removed));

        if self.active.is_none() {
            return Ok(removed);
        }
        if index < self.pool.index {
            self.pool.index -= 1;
        } else if index == self.pool.index {
            self.active = self.pool.current().map(|c| self.provider.bind(c));
            if self.active.is_none() {
                tracing::warn!("[🧠] Active credential removed and none remain after it");
            }
        }
        Ok(removed)
    }

    /// Walks the pool up to `max_rounds` times and returns the first credential
    /// that answers a minimal prompt. Does not change the active binding.
    pub async fn probe_all(&self, test_prompt: &str, max_rounds: u32) -> Result<String> {
        if self.pool.is_empty() {
            tracing::error!("[🔎] Credential list is empty");
            return Err(RelayError::NoCredentials.into());
        }

        let request = CompletionRequest::new(PROBE_SYSTEM_PROMPT, test_prompt, PROBE_MAX_TOKENS);

        for round in 1..=max_rounds {
            tracing::info!("[🔎] Looking for a working credential (round {}/{})", round, max_rounds);
            for credential in self.pool.credentials() {
                let client = self.provider.bind(credential);
                match client.complete(&request).await {
                    Ok(text) if !text.trim().is_empty() => {
                        tracing::info!("[✅] Working credential found: {}", mask_credential(credential));
                        return Ok(credential.clone());
                    }
                    Ok(_) => {
                        tracing::warn!("[⚠] Empty probe response: {}", mask_credential(credential));
                    }
                    Err(e) => match &e.inner {
                        RelayError::RateLimited(_) => {
                            tracing::warn!("[⚠] 429 (rate limited): {}", mask_credential(credential));
                        }
                        RelayError::Unauthorized(_) => {
                            tracing::warn!("[⚠] 401 (invalid): {}", mask_credential(credential));
                        }
                        other => {
                            tracing::warn!("[⚠] Credential error {}: {}", mask_credential(credential), other);
                        }
                    },
                }
            }
        }

        tracing::error!("[❌] No working credential found");
        Err(RelayError::NoWorkingCredential.into())
    }

    /// Issues one completion, rotating through the pool on rate-limit or
    /// authorization failures. Other errors abort without a retry.
    pub async fn complete(&mut self, prompt: &str, system_prompt: &str) -> Result<String> {
        let request = CompletionRequest::new(system_prompt, prompt, REPLY_MAX_TOKENS);

        loop {
            let client = match &self.active {
                Some(c) => c.clone(),
                None => {
                    return Err(if self.pool.is_empty() {
                        RelayError::NoCredentials
                    } else {
                        RelayError::PoolExhausted
                    }
                    .into())
                }
            };

            match client.complete(&request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.inner.is_credential_failure() => {
                    tracing::warn!(
                        "[🔁] Credential problem on {} ({}), trying the next one",
                        mask_credential(client.credential()),
                        e.inner
                    );
                    self.rotate()?;
                }
                Err(e) => {
                    tracing::error!("[❌] AI error: {}", e.inner);
                    return Err(e);
                }
            }
        }
    }
}
