use alloy::primitives::Address;
use dotenv::dotenv;
use serde::Deserialize;
use std::time::Duration;

use crate::reconcile::Timings;

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    pub ponder_url: String,
    /// When set, listings come from this backend's `/properties` instead of Ponder.
    pub backend_url: Option<String>,
    pub rpc_url: String,
    pub contract_address: String,
    /// Without a key the client is a read-only viewer.
    pub wallet_private_key: Option<String>,
    pub settle_delay_ms: u64,
    pub message_display_ms: u64,
    pub offer_grace_ms: u64,
}

impl ClientConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv().ok();
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("ponder_url", "http://localhost:42069")?
            .set_default("rpc_url", "http://localhost:8545")?
            .set_default("contract_address", "0x9fe46736679d2d9a65f0992f2272de9f3c7fa6e0")?
            .set_default("settle_delay_ms", 2000)?
            .set_default("message_display_ms", 5000)?
            .set_default("offer_grace_ms", 15000)?
            .add_source(source)
            .build()?
            .try_deserialize()
    }

    pub fn contract(&self) -> Result<Address, config::ConfigError> {
        self.contract_address.parse().map_err(|e| {
            config::ConfigError::Message(format!(
                "invalid contract address {}: {}",
                self.contract_address, e
            ))
        })
    }

    pub fn timings(&self) -> Timings {
        Timings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            message_display: Duration::from_millis(self.message_display_ms),
            offer_grace: Duration::from_millis(self.offer_grace_ms),
        }
    }
}
