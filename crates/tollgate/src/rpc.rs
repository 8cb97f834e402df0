//! JSON-RPC ledger adapter.
//!
//! Issues the two read-only queries the verifier needs (`getTransaction` and
//! `getAccountInfo`, both with `jsonParsed` encoding) and maps the responses
//! into [`TransactionRecord`] / [`TokenAccount`]. No retries.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::constants::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::error::TollgateError;
use crate::ledger::{LedgerQuery, ParsedInstruction, TokenAccount, TransactionRecord};

/// Ledger access over a JSON-RPC endpoint.
#[derive(Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    rpc_url: String,
    timeout: Duration,
}

impl RpcLedger {
    pub fn new(client: reqwest::Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Bound every query to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, TollgateError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TollgateError::QueryError(format!(
                        "{method} timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    TollgateError::QueryError(format!("{method} request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TollgateError::QueryError(format!(
                "{method} returned HTTP {status}"
            )));
        }

        let mut envelope: Value = resp
            .json()
            .await
            .map_err(|e| TollgateError::QueryError(format!("{method} response parse failed: {e}")))?;

        if let Some(err) = envelope.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(TollgateError::QueryError(format!("{method}: {message}")));
        }

        Ok(envelope
            .get_mut("result")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }
}

#[async_trait]
impl LedgerQuery for RpcLedger {
    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<TransactionRecord>, TollgateError> {
        let result = self
            .call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0,
                    }
                ]),
            )
            .await?;
        Ok(parse_transaction(signature, &result))
    }

    async fn token_account(&self, address: &str) -> Result<Option<TokenAccount>, TollgateError> {
        let result = self
            .call(
                "getAccountInfo",
                json!([address, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
            )
            .await?;
        Ok(parse_token_account(address, &result))
    }
}

/// Decode a `getTransaction` result. `null` means the signature is unknown.
pub fn parse_transaction(signature: &str, result: &Value) -> Option<TransactionRecord> {
    if result.is_null() {
        return None;
    }

    let meta = result.get("meta");
    let failed = meta
        .and_then(|m| m.get("err"))
        .map(|err| !err.is_null())
        .unwrap_or(false);

    let instructions = result
        .pointer("/transaction/message/instructions")
        .and_then(Value::as_array)
        .map(|ixs| ixs.iter().map(parse_instruction).collect())
        .unwrap_or_default();

    let inner_instructions = meta
        .and_then(|m| m.get("innerInstructions"))
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(|g| g.get("instructions").and_then(Value::as_array))
                .flatten()
                .map(parse_instruction)
                .collect()
        })
        .unwrap_or_default();

    Some(TransactionRecord {
        signature: signature.to_string(),
        failed,
        instructions,
        inner_instructions,
    })
}

fn parse_instruction(ix: &Value) -> ParsedInstruction {
    let parsed = ix.get("parsed");
    ParsedInstruction {
        program_id: ix
            .get("programId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        kind: parsed
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .map(String::from),
        info: parsed
            .and_then(|p| p.get("info"))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

/// Decode a `getAccountInfo` result. A missing `value` means no such account.
pub fn parse_token_account(address: &str, result: &Value) -> Option<TokenAccount> {
    let value = result.get("value").filter(|v| !v.is_null())?;
    let owner = value
        .pointer("/data/parsed/info/owner")
        .and_then(Value::as_str)
        .map(String::from);
    Some(TokenAccount {
        address: address.to_string(),
        owner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TOKEN_PROGRAM_ID;

    fn transaction_fixture(err: Value) -> Value {
        json!({
            "slot": 1234,
            "meta": {
                "err": err,
                "innerInstructions": [{
                    "index": 0,
                    "instructions": [{
                        "program": "spl-token",
                        "programId": TOKEN_PROGRAM_ID,
                        "parsed": {
                            "type": "transferChecked",
                            "info": {
                                "source": "SrcAta",
                                "destination": "DstAta",
                                "authority": "Payer",
                                "tokenAmount": { "amount": "250000", "decimals": 6 }
                            }
                        }
                    }]
                }]
            },
            "transaction": {
                "signatures": ["sig1"],
                "message": {
                    "instructions": [{
                        "programId": "ComputeBudget111111111111111111111111111111",
                        "accounts": [],
                        "data": "3DTZbgwsozUF"
                    }]
                }
            }
        })
    }

    #[test]
    fn test_parse_transaction_null_is_not_found() {
        assert!(parse_transaction("sig1", &Value::Null).is_none());
    }

    #[test]
    fn test_parse_transaction_flattens_inner_instructions() {
        let record = parse_transaction("sig1", &transaction_fixture(Value::Null)).unwrap();
        assert!(!record.failed);
        assert_eq!(record.instructions.len(), 1);
        assert_eq!(record.instructions[0].kind, None);
        assert_eq!(record.inner_instructions.len(), 1);

        let transfer = &record.inner_instructions[0];
        assert!(transfer.is_token_transfer(TOKEN_PROGRAM_ID));
        assert_eq!(transfer.destination(), Some("DstAta"));
        assert_eq!(transfer.raw_amount(), Some(&json!("250000")));
    }

    #[test]
    fn test_parse_transaction_failed() {
        let record = parse_transaction(
            "sig1",
            &transaction_fixture(json!({ "InstructionError": [0, "Custom"] })),
        )
        .unwrap();
        assert!(record.failed);
    }

    #[test]
    fn test_parse_token_account() {
        let result = json!({
            "context": { "slot": 1 },
            "value": {
                "owner": TOKEN_PROGRAM_ID,
                "data": {
                    "program": "spl-token",
                    "parsed": { "type": "account", "info": { "owner": "Wallet", "mint": "Mint" } }
                }
            }
        });
        let account = parse_token_account("DstAta", &result).unwrap();
        assert_eq!(account.owner.as_deref(), Some("Wallet"));

        let raw = json!({ "value": { "owner": "x", "data": ["AAAA", "base64"] } });
        assert_eq!(parse_token_account("DstAta", &raw).unwrap().owner, None);

        assert!(parse_token_account("DstAta", &json!({ "value": null })).is_none());
    }
}
