//! Hand-authored policy tables for the supported integrations.
//!
//! These are the only place integration endpoints and contract addresses
//! live. API keys arrive from the host at startup; a table entry whose key
//! is missing fails adapter construction and is skipped by the facade.

use stakeport_common::types::{AssetRef, PolicyFlags, StakeProviderInfo, StakeWarnings};

use crate::adapters::{
    AdapterConfig, GlifInfinityPoolConfig, KilnCardanoConfig, KilnEthereumConfig, StakeKitConfig,
    TarotVelodromeConfig, ThorchainYieldConfig,
};
use crate::policy::PolicyConfig;

/// Credentials the host supplies for the integrations that need them.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub kiln_api_key: Option<String>,
    pub kiln_account_id: Option<String>,
    pub stakekit_api_key: Option<String>,
}

fn provider(display_name: &str, plugin_id: &str, stake_provider_id: &str) -> StakeProviderInfo {
    StakeProviderInfo {
        display_name: display_name.to_string(),
        plugin_id: plugin_id.to_string(),
        stake_provider_id: stake_provider_id.to_string(),
    }
}

pub fn cardano_kiln_policy(keys: &ApiKeys) -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "cardano-kiln-pooled".to_string(),
        parent_plugin_id: "cardano".to_string(),
        parent_currency_code: "ADA".to_string(),
        stake_provider_info: provider("Kiln Pooled Staking", "cardano", "cardano_kiln"),
        adapter_config: AdapterConfig::CardanoPooledKiln(KilnCardanoConfig {
            api_url: "https://api.kiln.fi".to_string(),
            api_key: keys.kiln_api_key.clone(),
            account_id: keys.kiln_account_id.clone(),
            pool_id: "pool10rdglgh4pzvkf936p2m669qzarr9dusrhmmz9nultm3uvq4eh5k".to_string(),
        }),
        stake_assets: vec![AssetRef::new("cardano", "ADA")],
        reward_assets: vec![AssetRef::new("cardano", "ADA")],
        flags: PolicyFlags {
            disable_max_stake: true,
            must_max_unstake: true,
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings {
            stake: Some(
                "Delegation applies to the whole wallet balance, including future deposits."
                    .to_string(),
            ),
            ..Default::default()
        },
    }
}

pub fn ethereum_kiln_policy(keys: &ApiKeys) -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "ethereum-kiln-pooled".to_string(),
        parent_plugin_id: "ethereum".to_string(),
        parent_currency_code: "ETH".to_string(),
        stake_provider_info: provider("Kiln Pooled Staking", "ethereum", "ethereum_kiln"),
        adapter_config: AdapterConfig::EthereumPooledKiln(KilnEthereumConfig {
            rpc_urls: vec![
                "https://ethereum-rpc.publicnode.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
            ],
            pool_contract_address: "0x0f9a8d4b4d146e9e3e70b1cf1e8e6c1e55b9f7e0".to_string(),
            exit_queue_address: "0x8d6fd650500f82c7d978a440348e5a9b886943bf".to_string(),
            api_url: "https://api.kiln.fi".to_string(),
            api_key: keys.kiln_api_key.clone(),
            gas_multiplier: 2,
        }),
        stake_assets: vec![AssetRef::new("ethereum", "ETH")],
        reward_assets: vec![AssetRef::new("ethereum", "ETH")],
        flags: PolicyFlags {
            is_liquid_staking: true,
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings {
            unstake: Some(
                "Exits wait in a queue and become claimable once the protocol can fulfill them."
                    .to_string(),
            ),
            ..Default::default()
        },
    }
}

pub fn glif_policy() -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "filecoin-glif-infinity-pool".to_string(),
        parent_plugin_id: "filecoin".to_string(),
        parent_currency_code: "FIL".to_string(),
        stake_provider_info: provider("GLIF Infinity Pool", "filecoin", "glif_pool"),
        adapter_config: AdapterConfig::GlifInfinityPool(GlifInfinityPoolConfig {
            rpc_urls: vec!["https://api.node.glif.io/rpc/v1".to_string()],
            pool_address: "0x43dae5624445e7679d16a63211c5ff368681500c".to_string(),
            ifil_token_address: "0x690908f7fa93afc040cfbd9fe1ddd2c2668aa0e0".to_string(),
            metrics_url: "https://events.glif.link/apy/latest".to_string(),
            // Filecoin gas estimation undershoots routinely.
            gas_multiplier: 2,
        }),
        stake_assets: vec![AssetRef::new("filecoin", "FIL")],
        reward_assets: vec![AssetRef::new("filecoin", "FIL")],
        flags: PolicyFlags {
            is_liquid_staking: true,
            hide_claim_action: true,
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings::default(),
    }
}

pub fn tarot_policy() -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "optimism-tarot-velodrome-usdc-susd".to_string(),
        parent_plugin_id: "optimism".to_string(),
        parent_currency_code: "ETH".to_string(),
        stake_provider_info: provider("Tarot Leveraged LP", "optimism", "tarot_velodrome"),
        adapter_config: AdapterConfig::TarotVelodromePool(TarotVelodromeConfig {
            rpc_urls: vec!["https://mainnet.optimism.io".to_string()],
            token0_address: "0x7f5c764cbc14f9669b88837ca1490cca17c31607".to_string(),
            token1_address: "0x8c6f28f2f1a3c87f0f938b96d27520d9751ec8d9".to_string(),
            lp_token_address: "0xd16232ad60188b68076a235c65d692090caba155".to_string(),
            router_address: "0x6ba30c00bdec566a05a2cb1c7c8c5c1c2e4f13f7".to_string(),
            collateral_address: "0x4d1b76a0a47ed94b7aabeaced5e360a9b0286053".to_string(),
            borrowable0_address: "0xf78daa2a1b8488d9a42c81b23d426b6a9b1a607e".to_string(),
            borrowable1_address: "0x1a3e164f2e9b4a9a92d6a96ca3e1c2e3f50d66a8".to_string(),
            is_stable_pair: true,
            leverage: 2,
            apy_url: "https://api.tarot.to/v1/apy/optimism/usdc-susd".to_string(),
            gas_multiplier: 2,
        }),
        stake_assets: vec![
            AssetRef::new("optimism", "USDC"),
            AssetRef::new("optimism", "SUSD"),
        ],
        reward_assets: vec![
            AssetRef::new("optimism", "USDC"),
            AssetRef::new("optimism", "SUSD"),
        ],
        flags: PolicyFlags {
            is_stable_pool: true,
            hide_claim_action: true,
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings {
            stake: Some(
                "Leveraged positions borrow against the pool and can be liquidated.".to_string(),
            ),
            ..Default::default()
        },
    }
}

pub fn coreum_stakekit_policy(keys: &ApiKeys) -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "coreum-stakekit-native".to_string(),
        parent_plugin_id: "coreum".to_string(),
        parent_currency_code: "COREUM".to_string(),
        stake_provider_info: provider("Coreum Native Staking", "coreum", "coreum_stakekit"),
        adapter_config: AdapterConfig::CoreumNativeStakeKit(StakeKitConfig {
            api_url: "https://api.stakek.it".to_string(),
            api_key: keys.stakekit_api_key.clone(),
            integration_id: "coreum-core-native-staking".to_string(),
            validator_address: "corevaloper1k0rllvenwr02gvm52fh5056g5m3hly2lpf63z5".to_string(),
            decimals: 6,
        }),
        stake_assets: vec![AssetRef::new("coreum", "COREUM")],
        reward_assets: vec![AssetRef::new("coreum", "COREUM")],
        flags: PolicyFlags {
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings {
            unstake: Some("Undelegated funds unbond for 7 days before they unlock.".to_string()),
            ..Default::default()
        },
    }
}

pub fn thorchain_yield_policy() -> PolicyConfig {
    PolicyConfig {
        stake_policy_id: "thorchain-runepool".to_string(),
        parent_plugin_id: "thorchainrune".to_string(),
        parent_currency_code: "RUNE".to_string(),
        stake_provider_info: provider("Thorchain RUNEPool", "thorchainrune", "tcyield"),
        adapter_config: AdapterConfig::ThorchainYield(ThorchainYieldConfig {
            thornode_servers: vec!["https://thornode.ninerealms.com".to_string()],
            midgard_servers: vec!["https://midgard.ninerealms.com".to_string()],
        }),
        stake_assets: vec![AssetRef::new("thorchainrune", "RUNE")],
        reward_assets: vec![AssetRef::new("thorchainrune", "RUNE")],
        flags: PolicyFlags {
            hide_claim_action: true,
            hide_unstake_and_claim_action: true,
            ..Default::default()
        },
        warnings: StakeWarnings::default(),
    }
}

/// Every policy the generic plugin ships with, in display order.
pub fn default_policy_configs(keys: &ApiKeys) -> Vec<PolicyConfig> {
    vec![
        cardano_kiln_policy(keys),
        ethereum_kiln_policy(keys),
        glif_policy(),
        tarot_policy(),
        coreum_stakekit_policy(keys),
        thorchain_yield_policy(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::make_adapter;

    fn full_keys() -> ApiKeys {
        ApiKeys {
            kiln_api_key: Some("kiln_test_key".to_string()),
            kiln_account_id: Some("9d4b1f38-0c82-4a36-b6ff-0d3c4f7b8a21".to_string()),
            stakekit_api_key: Some("stakekit_test_key".to_string()),
        }
    }

    #[test]
    fn test_every_config_has_an_adapter() {
        let configs = default_policy_configs(&full_keys());
        assert_eq!(configs.len(), 6);
        for config in &configs {
            make_adapter(config).unwrap_or_else(|err| {
                panic!("policy {} failed to construct: {err}", config.stake_policy_id)
            });
        }
    }

    #[test]
    fn test_missing_credentials_fail_construction() {
        let configs = default_policy_configs(&ApiKeys::default());
        let failures = configs
            .iter()
            .filter(|config| make_adapter(config).is_err())
            .count();
        // Both Kiln policies and the StakeKit policy need credentials.
        assert_eq!(failures, 3);
    }

    #[test]
    fn test_policy_ids_are_unique() {
        let configs = default_policy_configs(&full_keys());
        let mut ids: Vec<_> = configs
            .iter()
            .map(|config| config.stake_policy_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), configs.len());
    }
}
