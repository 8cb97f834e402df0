use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DEVNET_RPC_URL, MAINNET_RPC_URL, TESTNET_RPC_URL};
use crate::error::TollgateError;

/// Ledger network a payment can be made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Mainnet,
    Devnet,
    Testnet,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Mainnet, Chain::Devnet, Chain::Testnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet",
            Chain::Devnet => "devnet",
            Chain::Testnet => "testnet",
        }
    }

    /// Public JSON-RPC endpoint used when no override is configured.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Chain::Mainnet => MAINNET_RPC_URL,
            Chain::Devnet => DEVNET_RPC_URL,
            Chain::Testnet => TESTNET_RPC_URL,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Chain::Mainnet),
            "devnet" => Ok(Chain::Devnet),
            "testnet" => Ok(Chain::Testnet),
            other => Err(TollgateError::UnknownChain(other.to_string())),
        }
    }
}
