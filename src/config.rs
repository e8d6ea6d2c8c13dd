//! Configuration for Tollgate
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::money::AssetConfig;
use crate::pricing::PricingConfig;

/// Tollgate - payment-gated task ingestion gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "tollgate")]
#[command(about = "Payment-gated task ingestion gateway")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "tollgate")]
    pub mongodb_db: String,

    /// Settlement facilitator base URL (required in production)
    #[arg(long, env = "FACILITATOR_URL")]
    pub facilitator_url: Option<String>,

    /// Facilitator request timeout in milliseconds
    #[arg(long, env = "FACILITATOR_TIMEOUT_MS", default_value = "10000")]
    pub facilitator_timeout_ms: u64,

    /// Settlement asset identifier
    #[arg(long, env = "ASSET", default_value = "usdc")]
    pub asset: String,

    /// Settlement network identifier
    #[arg(long, env = "NETWORK", default_value = "base-sepolia")]
    pub network: String,

    /// Decimal precision of the settlement asset
    #[arg(long, env = "ASSET_DECIMALS", default_value = "6")]
    pub asset_decimals: u32,

    /// Address payments must be made out to (required in production)
    #[arg(long, env = "PAY_TO")]
    pub pay_to: Option<String>,

    /// Platform fee in basis points (100 = 1%)
    #[arg(long, env = "FEE_BPS", default_value = "100")]
    pub fee_bps: u32,

    /// How long a computed payment requirement is honored, in seconds
    #[arg(long, env = "REQUIREMENT_TTL_SECS", default_value = "600")]
    pub requirement_ttl_secs: i64,

    /// How long failed settlement attempts stay in the diagnostic log
    #[arg(long, env = "ATTEMPT_LOG_TTL_SECS", default_value = "900")]
    pub attempt_log_ttl_secs: u64,

    /// Webhook URL notified when submissions are rated (optional)
    #[arg(long, env = "NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Reputation ledger webhook URL (optional)
    #[arg(long, env = "REPUTATION_URL")]
    pub reputation_url: Option<String>,

    /// Webhook request timeout in milliseconds
    #[arg(long, env = "WEBHOOK_TIMEOUT_MS", default_value = "5000")]
    pub webhook_timeout_ms: u64,

    /// Enable development mode (in-memory store fallback, local settlement)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Effective payee address (dev mode gets a placeholder)
    pub fn pay_to(&self) -> String {
        match &self.pay_to {
            Some(addr) => addr.clone(),
            None => "0xtollgate-dev".to_string(),
        }
    }

    /// Pricing configuration derived from the asset/fee flags
    pub fn pricing_config(&self) -> PricingConfig {
        PricingConfig {
            asset: AssetConfig {
                asset: self.asset.clone(),
                network: self.network.clone(),
                decimals: self.asset_decimals,
                pay_to: self.pay_to(),
            },
            fee_bps: self.fee_bps,
            requirement_ttl_secs: self.requirement_ttl_secs,
        }
    }

    /// Validate configuration before startup
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.pay_to.is_none() {
                return Err("PAY_TO is required in production mode".to_string());
            }
            if self.facilitator_url.is_none() {
                return Err("FACILITATOR_URL is required in production mode".to_string());
            }
        }
        if self.fee_bps > 10_000 {
            return Err("FEE_BPS must not exceed 10000".to_string());
        }
        if self.asset_decimals > 18 {
            return Err("ASSET_DECIMALS must not exceed 18".to_string());
        }
        if self.requirement_ttl_secs <= 0 {
            return Err("REQUIREMENT_TTL_SECS must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["tollgate", "--dev-mode"])
    }

    #[test]
    fn test_dev_mode_defaults_validate() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn test_production_requires_payee_and_facilitator() {
        let args = Args::parse_from(["tollgate"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["tollgate", "--pay-to", "0xgate"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from([
            "tollgate",
            "--pay-to",
            "0xgate",
            "--facilitator-url",
            "http://localhost:9000",
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_fee_bound() {
        let args = Args::parse_from(["tollgate", "--dev-mode", "--fee-bps", "20000"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_pricing_config_mirrors_flags() {
        let args = Args::parse_from([
            "tollgate",
            "--dev-mode",
            "--asset",
            "dai",
            "--asset-decimals",
            "18",
            "--fee-bps",
            "50",
        ]);
        let pricing = args.pricing_config();
        assert_eq!(pricing.asset.asset, "dai");
        assert_eq!(pricing.asset.decimals, 18);
        assert_eq!(pricing.fee_bps, 50);
        assert_eq!(pricing.asset.pay_to, "0xtollgate-dev");
    }
}
