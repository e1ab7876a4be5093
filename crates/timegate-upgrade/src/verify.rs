use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use timegate_core::constants::{ALREADY_VERIFIED_MARKER, RPC_TIMEOUT_SECS};
use timegate_core::error::TimegateError;
use timegate_core::types::Address;
use timegate_core::unit::LogicArtifact;

use crate::config::ExplorerConfig;

/// What the explorer is asked to attach to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMetadata {
    Implementation { contract_name: String, compiler_version: String, source: String },
    /// A proxy: the explorer links it to its implementation.
    Proxy,
}

impl SourceMetadata {
    pub fn for_artifact(artifact: &LogicArtifact) -> Self {
        SourceMetadata::Implementation {
            contract_name: artifact.contract_name.clone(),
            compiler_version: artifact.compiler_version.clone(),
            source: artifact.source.clone(),
        }
    }
}

/// A block-explorer style source verification backend.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Submit `source` for `address`. Any error is reported as a message; the
    /// adapter decides what it means.
    async fn submit(
        &self,
        address: &Address,
        constructor_args: &[u8],
        source: &SourceMetadata,
    ) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    Failed(String),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        !matches!(self, VerificationOutcome::Failed(_))
    }
}

/// Best-effort wrapper: verification never fails an upgrade.
pub struct VerificationAdapter {
    service: Box<dyn VerificationService>,
}

impl VerificationAdapter {
    pub fn new(service: Box<dyn VerificationService>) -> Self {
        Self { service }
    }

    pub async fn verify(
        &self,
        address: &Address,
        constructor_args: &[u8],
        source: &SourceMetadata,
    ) -> VerificationOutcome {
        match self.service.submit(address, constructor_args, source).await {
            Ok(()) => {
                info!(%address, "source verified");
                VerificationOutcome::Verified
            }
            Err(msg) if msg.to_lowercase().contains(ALREADY_VERIFIED_MARKER) => {
                debug!(%address, "source was already verified");
                VerificationOutcome::AlreadyVerified
            }
            Err(msg) => {
                warn!(%address, error = %msg, "source verification failed; continuing");
                VerificationOutcome::Failed(msg)
            }
        }
    }
}

// ── ExplorerService ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExplorerReply {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

/// Etherscan-compatible `contract` API over HTTP form posts.
pub struct ExplorerService {
    config: ExplorerConfig,
    client: reqwest::Client,
}

impl ExplorerService {
    pub fn new(config: ExplorerConfig) -> Result<Self, TimegateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .map_err(|e| TimegateError::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    fn form(
        &self,
        address: &Address,
        constructor_args: &[u8],
        source: &SourceMetadata,
    ) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("module", "contract".to_string()),
            ("apikey", self.config.api_key.clone()),
        ];
        match source {
            SourceMetadata::Implementation { contract_name, compiler_version, source } => {
                form.push(("action", "verifysourcecode".into()));
                form.push(("contractaddress", address.to_hex()));
                form.push(("sourceCode", source.clone()));
                form.push(("codeformat", "solidity-single-file".into()));
                form.push(("contractname", contract_name.clone()));
                form.push(("compilerversion", compiler_version.clone()));
                // Misspelling is the explorer API's own.
                form.push(("constructorArguements", hex::encode(constructor_args)));
            }
            SourceMetadata::Proxy => {
                form.push(("action", "verifyproxycontract".into()));
                form.push(("address", address.to_hex()));
            }
        }
        form
    }
}

#[async_trait]
impl VerificationService for ExplorerService {
    async fn submit(
        &self,
        address: &Address,
        constructor_args: &[u8],
        source: &SourceMetadata,
    ) -> Result<(), String> {
        let resp = self
            .client
            .post(&self.config.api_url)
            .form(&self.form(address, constructor_args, source))
            .send()
            .await
            .map_err(|e| format!("explorer unreachable: {e}"))?;
        let reply: ExplorerReply =
            resp.json().await.map_err(|e| format!("unreadable explorer reply: {e}"))?;

        if reply.status == "1" {
            Ok(())
        } else {
            let detail = reply.result.as_str().map(str::to_string).unwrap_or(reply.result.to_string());
            Err(format!("{}: {detail}", reply.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<(), String>,
        seen: Mutex<Vec<Address>>,
    }

    #[async_trait]
    impl VerificationService for Canned {
        async fn submit(&self, address: &Address, _: &[u8], _: &SourceMetadata) -> Result<(), String> {
            self.seen.lock().unwrap().push(*address);
            self.reply.clone()
        }
    }

    fn adapter(reply: Result<(), String>) -> VerificationAdapter {
        VerificationAdapter::new(Box::new(Canned { reply, seen: Mutex::new(vec![]) }))
    }

    #[tokio::test]
    async fn success_is_verified() {
        let out = adapter(Ok(())).verify(&Address([1; 20]), &[], &SourceMetadata::Proxy).await;
        assert_eq!(out, VerificationOutcome::Verified);
    }

    #[tokio::test]
    async fn already_verified_matches_any_case() {
        let out = adapter(Err("NOTOK: Contract source code Already Verified".into()))
            .verify(&Address([1; 20]), &[], &SourceMetadata::Proxy)
            .await;
        assert_eq!(out, VerificationOutcome::AlreadyVerified);
        assert!(out.is_verified());
    }

    #[tokio::test]
    async fn other_failures_are_reported_not_raised() {
        let out = adapter(Err("rate limited".into()))
            .verify(&Address([1; 20]), &[], &SourceMetadata::Proxy)
            .await;
        assert_eq!(out, VerificationOutcome::Failed("rate limited".into()));
        assert!(!out.is_verified());
    }

    #[test]
    fn implementation_form_carries_source_fields() {
        let service = ExplorerService::new(ExplorerConfig {
            api_url: "http://127.0.0.1:1/api".into(),
            api_key: "KEY".into(),
        })
        .unwrap();
        let meta = SourceMetadata::Implementation {
            contract_name: "Vault".into(),
            compiler_version: "v0.8.24".into(),
            source: "contract Vault {}".into(),
        };
        let form = service.form(&Address([2; 20]), &[0xab], &meta);
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("action"), Some("verifysourcecode"));
        assert_eq!(get("contractname"), Some("Vault"));
        assert_eq!(get("constructorArguements"), Some("ab"));
        assert_eq!(get("apikey"), Some("KEY"));
    }

    #[tokio::test]
    async fn unreachable_explorer_fails_softly() {
        let service = ExplorerService::new(ExplorerConfig {
            api_url: "http://127.0.0.1:1/api".into(),
            api_key: String::new(),
        })
        .unwrap();
        let out = VerificationAdapter::new(Box::new(service))
            .verify(&Address([3; 20]), &[], &SourceMetadata::Proxy)
            .await;
        assert!(matches!(out, VerificationOutcome::Failed(_)));
    }
}
