/// Proof token that marks a zero-cost call. Verification is skipped entirely.
pub const FREE_CALL_SENTINEL: &str = "free-api-call";

/// Sender reported for calls that were not paid on-chain.
pub const UNKNOWN_SENDER: &str = "unknown";

/// SPL Token program id.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// USDC has 6 decimal places.
pub const TOKEN_DECIMALS: u32 = 6;

/// Default JSON-RPC endpoints per chain.
pub const MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";
pub const TESTNET_RPC_URL: &str = "https://api.testnet.solana.com";

/// Default bound on a single chain query.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 15;

/// Payment-token settings shared by every supported chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    /// Program that owns the payment token accounts.
    pub program_id: String,
    pub decimals: u32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            program_id: TOKEN_PROGRAM_ID.to_string(),
            decimals: TOKEN_DECIMALS,
        }
    }
}

impl TokenConfig {
    /// Convert raw token units to a decimal amount.
    pub fn to_decimal(&self, raw: u64) -> f64 {
        raw as f64 / 10f64.powi(self.decimals as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_decimal() {
        let token = TokenConfig::default();
        assert_eq!(token.to_decimal(10_000), 0.01);
        assert_eq!(token.to_decimal(1_000_000), 1.0);
        assert_eq!(token.to_decimal(0), 0.0);

        let nine = TokenConfig {
            decimals: 9,
            ..TokenConfig::default()
        };
        assert_eq!(nine.to_decimal(2_500_000_000), 2.5);
    }
}
