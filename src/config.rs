//! CLI/env configuration (§6). Parsed with clap's derive API, each flag
//! bound to an env-var fallback so the agent can run purely from environment
//! variables the way the teacher's `Config::from_env` does.

use clap::Parser;

use crate::errors::AgentError;
use crate::orchestrator::{OrchestratorConfig, StrayPositionPolicy};

#[derive(Parser, Clone, Debug)]
#[command(name = "reward-maker", about = "Autonomous reward-market maker for binary prediction markets")]
pub struct Cli {
    /// Capital budget, in USD, to quote with.
    #[arg(long, env = "LIQUIDITY")]
    pub liquidity: f64,

    /// Minimum fractional earnings improvement required to switch markets.
    #[arg(long, default_value_t = 0.20, env = "THRESHOLD")]
    pub threshold: f64,

    /// Minutes between re-evaluation ticks (minimum 0.5).
    #[arg(long = "re-evaluate-interval", default_value_t = 5.0, env = "RE_EVALUATE_INTERVAL_MIN")]
    pub re_evaluate_interval_min: f64,

    /// Size, in shares, of each quote.
    #[arg(long = "order-size", env = "ORDER_SIZE")]
    pub order_size: f64,

    /// Fraction of the reward band's half-width used as the quote offset.
    #[arg(long, default_value_t = 0.5, env = "SPREAD")]
    pub spread: f64,

    /// Accepted but currently inert: no volatility filter is defined.
    #[arg(long = "max-volatility", env = "MAX_VOLATILITY")]
    pub max_volatility: Option<f64>,

    /// Accepted but currently inert: see `--max-volatility`.
    #[arg(long = "volatility-lookback", env = "VOLATILITY_LOOKBACK_MIN")]
    pub volatility_lookback_min: Option<f64>,

    /// Accepted but currently inert: see `--max-volatility`.
    #[arg(long = "no-volatility-filter")]
    pub no_volatility_filter: bool,

    /// Auto-enqueue stray positions found at startup as new liquidations.
    #[arg(long = "auto-resume")]
    pub auto_resume: bool,

    /// Ignore stray positions at startup. Requires explicit operator
    /// confirmation at the call site; takes precedence over `--auto-resume`.
    #[arg(long = "ignore-positions")]
    pub ignore_positions: bool,

    /// Report stray/liquidation positions and exit without market making.
    #[arg(long = "check-positions-only")]
    pub check_positions_only: bool,

    /// Arm the re-evaluation and market-switching timers.
    #[arg(long = "enable-switching")]
    pub enable_switching: bool,

    /// Place real orders (overrides the default dry-run mode).
    #[arg(long = "no-dry-run")]
    pub no_dry_run: bool,

    /// Force dry-run mode even if `--no-dry-run` was also passed.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Maximum directional exposure, in shares, before a market is handed to liquidation.
    #[arg(long = "max-net-exposure", default_value_t = 500.0, env = "MAX_NET_EXPOSURE")]
    pub max_net_exposure: f64,

    /// Utilization fraction of `max_net_exposure` at which a warning is logged.
    #[arg(long = "warn-threshold", default_value_t = 0.8, env = "WARN_THRESHOLD")]
    pub warn_threshold: f64,

    /// Directory for persisted fill ledgers and the liquidation queue.
    #[arg(long = "data-dir", default_value = "./data", env = "DATA_DIR")]
    pub data_dir: String,

    /// Polymarket CLOB REST endpoint.
    #[arg(long = "clob-url", default_value = "https://clob.polymarket.com", env = "CLOB_URL")]
    pub clob_url: String,

    /// Polymarket CLOB market-data WebSocket endpoint.
    #[arg(long = "clob-ws-url", default_value = "wss://ws-subscriptions-clob.polymarket.com/ws/market", env = "CLOB_WS_URL")]
    pub clob_ws_url: String,

    /// Polymarket authenticated user-trade WebSocket endpoint.
    #[arg(long = "user-ws-url", default_value = "wss://ws-subscriptions-clob.polymarket.com/ws/user", env = "USER_WS_URL")]
    pub user_ws_url: String,

    /// Gamma metadata API base URL.
    #[arg(long = "gamma-api-url", default_value = "https://gamma-api.polymarket.com", env = "GAMMA_API_URL")]
    pub gamma_api_url: String,

    /// Polygon RPC endpoint used for settlement transactions.
    #[arg(long = "rpc-url", env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// USDC collateral token address.
    #[arg(long = "collateral-token", env = "COLLATERAL_TOKEN_ADDRESS")]
    pub collateral_token_address: Option<String>,

    /// Conditional Tokens Framework contract address.
    #[arg(long = "ctf-address", env = "CTF_CONTRACT_ADDRESS")]
    pub ctf_contract_address: Option<String>,

    /// Order-signing private key.
    #[arg(long = "private-key", env = "FUNDER_PRIVATE_KEY")]
    pub funder_private_key: Option<String>,

    /// Public address matching the signing key.
    #[arg(long = "public-key", env = "FUNDER_PUBLIC_KEY")]
    pub funder_public_key: Option<String>,

    /// Proxy/Safe address if trading through one (0=EOA, 1=Proxy, 2=Gnosis Safe).
    #[arg(long = "signature-type", default_value_t = 0, env = "POLYMARKET_SIGNATURE_TYPE")]
    pub signature_type: u8,

    /// Funder address for proxy/Safe signing.
    #[arg(long = "funder-address", env = "POLYMARKET_FUNDER_ADDRESS")]
    pub polymarket_funder_address: Option<String>,

    /// User-trade WS auth key.
    #[arg(long = "api-key", env = "POLYMARKET_API_KEY")]
    pub api_key: Option<String>,

    /// User-trade WS auth secret.
    #[arg(long = "api-secret", env = "POLYMARKET_API_SECRET")]
    pub api_secret: Option<String>,

    /// User-trade WS auth passphrase.
    #[arg(long = "api-passphrase", env = "POLYMARKET_API_PASSPHRASE")]
    pub api_passphrase: Option<String>,
}

impl Cli {
    /// Validates cross-field rules and resolves derived values; §7's
    /// "Configuration invalid" kind is raised here.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.liquidity <= 0.0 {
            return Err(AgentError::Config("--liquidity must be positive".into()));
        }
        if self.order_size <= 0.0 {
            return Err(AgentError::Config("--order-size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.spread) || self.spread <= 0.0 {
            return Err(AgentError::Config("--spread must be in (0, 1]".into()));
        }
        if self.re_evaluate_interval_min < 0.5 {
            return Err(AgentError::Config("--re-evaluate-interval must be >= 0.5 minutes".into()));
        }
        if self.threshold < 0.0 {
            return Err(AgentError::Config("--threshold must be non-negative".into()));
        }
        if !self.dry_run() && self.funder_private_key.is_none() {
            return Err(AgentError::Config("--private-key (or FUNDER_PRIVATE_KEY) required outside dry-run".into()));
        }
        Ok(())
    }

    /// `--dry-run` always wins over `--no-dry-run`; absent either flag, the
    /// agent defaults to dry-run (matching the teacher's safety-first default).
    pub fn dry_run(&self) -> bool {
        if self.dry_run {
            true
        } else {
            !self.no_dry_run
        }
    }

    /// `--ignore-positions` takes precedence over `--auto-resume` when both
    /// are passed: the more explicit, confirmation-gated flag wins.
    pub fn stray_position_policy(&self) -> StrayPositionPolicy {
        if self.check_positions_only {
            StrayPositionPolicy::CheckOnly
        } else if self.ignore_positions {
            StrayPositionPolicy::Ignore
        } else if self.auto_resume {
            StrayPositionPolicy::AutoResume
        } else {
            StrayPositionPolicy::Prompt
        }
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            data_dir: self.data_dir.clone().into(),
            liquidity_usd: self.liquidity,
            min_improvement_fraction: self.threshold,
            re_evaluate_interval_ms: (self.re_evaluate_interval_min * 60_000.0) as u64,
            order_size: self.order_size,
            spread_fraction: self.spread,
            max_net_exposure: self.max_net_exposure,
            warn_threshold: self.warn_threshold,
            switching_enabled: self.enable_switching,
            stray_position_policy: self.stray_position_policy(),
            dry_run: self.dry_run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            liquidity: 1000.0,
            threshold: 0.20,
            re_evaluate_interval_min: 5.0,
            order_size: 20.0,
            spread: 0.5,
            max_volatility: None,
            volatility_lookback_min: None,
            no_volatility_filter: false,
            auto_resume: false,
            ignore_positions: false,
            check_positions_only: false,
            enable_switching: false,
            no_dry_run: false,
            dry_run: false,
            max_net_exposure: 500.0,
            warn_threshold: 0.8,
            data_dir: "./data".into(),
            clob_url: "https://clob.polymarket.com".into(),
            clob_ws_url: "wss://example".into(),
            user_ws_url: "wss://example".into(),
            gamma_api_url: "https://gamma-api.polymarket.com".into(),
            rpc_url: None,
            collateral_token_address: None,
            ctf_contract_address: None,
            funder_private_key: None,
            funder_public_key: None,
            signature_type: 0,
            polymarket_funder_address: None,
            api_key: None,
            api_secret: None,
            api_passphrase: None,
        }
    }

    /// Scenario: neither `--dry-run` nor `--no-dry-run` passed.
    /// Expected: defaults to dry-run.
    #[test]
    fn test_dry_run_default_true() {
        let cli = base_cli();
        assert!(cli.dry_run());
    }

    /// Scenario: `--no-dry-run` passed without `--dry-run`.
    /// Expected: dry_run() is false.
    #[test]
    fn test_no_dry_run_flips_false() {
        let mut cli = base_cli();
        cli.no_dry_run = true;
        assert!(!cli.dry_run());
    }

    /// Scenario: both `--dry-run` and `--no-dry-run` passed.
    /// Expected: `--dry-run` wins.
    #[test]
    fn test_dry_run_overrides_no_dry_run() {
        let mut cli = base_cli();
        cli.no_dry_run = true;
        cli.dry_run = true;
        assert!(cli.dry_run());
    }

    /// Scenario: both `--auto-resume` and `--ignore-positions` passed.
    /// Expected: ignore-positions wins (the resolved Open Question decision).
    #[test]
    fn test_ignore_positions_precedes_auto_resume() {
        let mut cli = base_cli();
        cli.auto_resume = true;
        cli.ignore_positions = true;
        assert_eq!(cli.stray_position_policy(), StrayPositionPolicy::Ignore);
    }

    /// Scenario: `--no-dry-run` passed but no private key supplied.
    /// Expected: validation fails with a Config error.
    #[test]
    fn test_validate_requires_private_key_outside_dry_run() {
        let mut cli = base_cli();
        cli.no_dry_run = true;
        assert!(cli.validate().is_err());
    }

    /// Scenario: a spread fraction of zero, which is outside (0, 1].
    /// Expected: validation rejects it.
    #[test]
    fn test_validate_rejects_zero_spread() {
        let mut cli = base_cli();
        cli.spread = 0.0;
        assert!(cli.validate().is_err());
    }
}
