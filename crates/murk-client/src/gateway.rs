//! HTTP implementations of the settlement collaborator traits.
//!
//! The gateways speak small JSON shapes: the chain gateway fronts the
//! pool contract (leaf reads, deposits, receipts with decoded `NewLeaf`
//! events), the relay and fill gateways answer `{tx}` or
//! `{message, noRetry}`, and the prover gateway owns the compiled
//! circuit artifact.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use murk_core::{Address, Amount, Field32, Hash32};
use murk_settle::{
    ChainClient, FillTaker, NewLeaf, Proof, Prover, ProverError, Relay, RelayOutcome, TxReceipt,
    TxStatus, Witness,
};
use murk_tree::LeafSource;

const RECEIPT_POLL: Duration = Duration::from_secs(3);

fn parse_field(value: &Value, key: &str) -> Result<Field32> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("response missing {key}"))?
        .parse()
        .map_err(|e| anyhow!("bad {key}: {e}"))
}

fn parse_hash(value: &Value, key: &str) -> Result<Hash32> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("response missing {key}"))?
        .parse()
        .map_err(|e| anyhow!("bad {key}: {e}"))
}

fn parse_outcome(value: &Value) -> Result<RelayOutcome> {
    if value.get("tx").is_some() {
        return Ok(RelayOutcome::Accepted {
            tx: parse_hash(value, "tx")?,
        });
    }
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown rejection")
        .to_string();
    let no_retry = value
        .get("noRetry")
        .and_then(|n| n.as_bool())
        .unwrap_or(false);
    Ok(RelayOutcome::Rejected { message, no_retry })
}

/// Chain gateway: leaf reads, deposits, and receipt retrieval.
pub struct ChainGateway {
    http: reqwest::Client,
    base: String,
}

impl ChainGateway {
    /// Point at a gateway base URL.
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let resp = self.http.get(format!("{}{path}", self.base)).send().await?;
        if !resp.status().is_success() {
            bail!("chain gateway returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("chain gateway returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl LeafSource for ChainGateway {
    async fn leaf_count(&self) -> Result<u32> {
        let v = self.get("/leaves/count").await?;
        v.get("count")
            .and_then(|c| c.as_u64())
            .map(|c| c as u32)
            .ok_or_else(|| anyhow!("response missing count"))
    }

    async fn leaves(&self, start: u32, count: u32) -> Result<Vec<Field32>> {
        let v = self
            .get(&format!("/leaves?start={start}&count={count}"))
            .await?;
        let list = v
            .get("leaves")
            .and_then(|l| l.as_array())
            .ok_or_else(|| anyhow!("response missing leaves"))?;
        let mut out = Vec::with_capacity(list.len());
        for item in list {
            let leaf: Field32 = item
                .as_str()
                .ok_or_else(|| anyhow!("leaf is not a string"))?
                .parse()
                .map_err(|e| anyhow!("bad leaf: {e}"))?;
            out.push(leaf);
        }
        Ok(out)
    }

    async fn root_at(&self, index: u32) -> Result<Field32> {
        let v = self.get(&format!("/roots/{index}")).await?;
        parse_field(&v, "root")
    }
}

#[async_trait]
impl ChainClient for ChainGateway {
    async fn deposit(
        &self,
        asset: Address,
        amount: Amount,
        secret_hash: Field32,
    ) -> Result<Hash32> {
        let v = self
            .post(
                "/deposit",
                json!({
                    "asset": asset.to_string(),
                    "amount": amount.units().to_string(),
                    "secretHash": secret_hash.to_string(),
                }),
            )
            .await?;
        parse_hash(&v, "tx")
    }

    async fn await_receipt(&self, tx: Hash32) -> Result<TxReceipt> {
        // The gateway answers {pending: true} until the transaction is
        // mined; waiting is unbounded, the surrounding task is cancellable.
        loop {
            let v = self.get(&format!("/receipt/{tx}")).await?;
            if v.get("pending").and_then(|p| p.as_bool()) == Some(true) {
                tokio::time::sleep(RECEIPT_POLL).await;
                continue;
            }
            let status = match v.get("status").and_then(|s| s.as_str()) {
                Some("success") => TxStatus::Succeeded,
                Some("reverted") => TxStatus::Reverted,
                other => bail!("unknown receipt status {other:?}"),
            };
            let mut new_leaves = Vec::new();
            if let Some(events) = v.get("newLeaves").and_then(|l| l.as_array()) {
                for event in events {
                    new_leaves.push(NewLeaf {
                        secret_hash: parse_field(event, "secretHash")?,
                        note_hash: parse_field(event, "noteHash")?,
                        inserted_index: event
                            .get("insertedIndex")
                            .and_then(|i| i.as_u64())
                            .ok_or_else(|| anyhow!("event missing insertedIndex"))?
                            as u32,
                    });
                }
            }
            return Ok(TxReceipt {
                tx,
                status,
                new_leaves,
            });
        }
    }
}

/// Relay gateway: submits prepared transactions on the user's behalf.
pub struct RelayGateway {
    http: reqwest::Client,
    url: String,
}

impl RelayGateway {
    /// Point at the relay endpoint.
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Relay for RelayGateway {
    async fn submit(&self, tx_data: &[u8]) -> Result<RelayOutcome> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({ "txData": format!("0x{}", hex::encode(tx_data)) }))
            .send()
            .await?;
        parse_outcome(&resp.json().await?)
    }
}

/// Fill gateway: attempts fills against the external limit-order protocol.
pub struct FillGateway {
    http: reqwest::Client,
    url: String,
}

impl FillGateway {
    /// Point at the fill endpoint.
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl FillTaker for FillGateway {
    async fn try_fill(&self, payload: &[u8], extension: &[u8]) -> Result<RelayOutcome> {
        let resp = self
            .http
            .post(&self.url)
            .json(&json!({
                "data": format!("0x{}", hex::encode(payload)),
                "extension": format!("0x{}", hex::encode(extension)),
            }))
            .send()
            .await?;
        parse_outcome(&resp.json().await?)
    }
}

/// Prover gateway: the proving service owns the compiled circuit artifact
/// and turns witnesses into proofs.
pub struct ProverGateway {
    http: reqwest::Client,
    url: String,
}

impl ProverGateway {
    /// Point at the proving endpoint.
    pub fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Prover for ProverGateway {
    async fn prove(&self, witness: &Witness) -> Result<Proof, ProverError> {
        let resp = self
            .http
            .post(&self.url)
            .json(witness)
            .send()
            .await
            .map_err(|e| ProverError::Backend(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let v: Value = resp
                .json()
                .await
                .map_err(|e| ProverError::Backend(e.to_string()))?;
            let message = v
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("witness rejected")
                .to_string();
            return Err(ProverError::Witness(message));
        }
        if !resp.status().is_success() {
            return Err(ProverError::Backend(format!(
                "prover returned {}",
                resp.status()
            )));
        }
        let v: Value = resp
            .json()
            .await
            .map_err(|e| ProverError::Backend(e.to_string()))?;
        let proof_hex = v
            .get("proof")
            .and_then(|p| p.as_str())
            .ok_or_else(|| ProverError::Backend("response missing proof".into()))?;
        let bytes = hex::decode(proof_hex.strip_prefix("0x").unwrap_or(proof_hex))
            .map_err(|e| ProverError::Backend(e.to_string()))?;
        Ok(Proof(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_outcome_needs_a_tx() {
        let v = json!({ "tx": format!("0x{}", hex::encode([7u8; 32])) });
        assert!(matches!(
            parse_outcome(&v).unwrap(),
            RelayOutcome::Accepted { .. }
        ));
    }

    #[test]
    fn rejection_defaults_to_transient() {
        let v = json!({ "message": "quote moved" });
        assert_eq!(
            parse_outcome(&v).unwrap(),
            RelayOutcome::Rejected {
                message: "quote moved".into(),
                no_retry: false,
            }
        );
    }

    #[test]
    fn no_retry_marks_permanent_rejection() {
        let v = json!({ "message": "unsupported asset", "noRetry": true });
        assert_eq!(
            parse_outcome(&v).unwrap(),
            RelayOutcome::Rejected {
                message: "unsupported asset".into(),
                no_retry: true,
            }
        );
    }
}
