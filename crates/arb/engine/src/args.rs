use eyre::eyre::eyre;
use std::time::Duration;
use tracing::{info, warn};

/// Execution engine args
#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct ArbEngineArgs {
    /// Engine args
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Block comparison args
    #[command(flatten)]
    pub comparison: ComparisonArgs,
}

/// Parameters for block production
#[derive(Debug, Clone, PartialEq, clap::Args)]
#[command(next_help_heading = "Execution Engine")]
pub struct EngineArgs {
    /// L2 block number of the block built from message index zero.
    #[arg(long = "engine.genesis_block_num", env = "ARB_GENESIS_BLOCK_NUM", default_value_t = 0)]
    pub genesis_block_num: u64,

    /// Commit built blocks directly to the chain instead of handing them to the processing
    /// pipeline and waiting for its verdict.
    #[arg(
        long = "engine.build_on_main_state",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub build_on_main_state: bool,

    /// How long to wait for the processing pipeline, in milliseconds.
    #[arg(long = "engine.processing_timeout_ms", default_value_t = 1_000)]
    pub processing_timeout_ms: u64,

    /// Speculatively execute the next message while the current one is digested.
    #[arg(long = "engine.prefetch", default_value_t = false)]
    pub prefetch: bool,

    /// Hold the safe block back to the last validated block.
    #[arg(long = "engine.safe_block_wait_for_validator", default_value_t = false)]
    pub safe_block_wait_for_validator: bool,

    /// Hold the finalized block back to the last validated block.
    #[arg(long = "engine.finalized_block_wait_for_validator", default_value_t = false)]
    pub finalized_block_wait_for_validator: bool,

    /// How far behind the consensus message count execution may lag and still be synced, in
    /// milliseconds.
    #[arg(long = "engine.msg_lag_ms", default_value_t = 1_000)]
    pub msg_lag_ms: u64,
}

impl Default for EngineArgs {
    fn default() -> Self {
        Self {
            genesis_block_num: 0,
            build_on_main_state: true,
            processing_timeout_ms: 1_000,
            prefetch: false,
            safe_block_wait_for_validator: false,
            finalized_block_wait_for_validator: false,
            msg_lag_ms: 1_000,
        }
    }
}

/// Parameters for cross-checking blocks against a trusted node
#[derive(Debug, Clone, Default, PartialEq, clap::Args)]
#[command(next_help_heading = "Block Comparison")]
pub struct ComparisonArgs {
    /// RPC endpoint of the reference node. Comparison is disabled when unset.
    #[arg(long = "comparison.rpc_url", env = "ARB_COMPARISON_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Compare every block whose number is a multiple of this value.
    #[arg(long = "comparison.interval", default_value_t = 1_000)]
    pub interval: u64,

    /// Attempts per reference block before giving up.
    #[arg(long = "comparison.max_retries", default_value_t = 100)]
    pub max_retries: u32,
}

/// Build mode of the engine. A static choice, not made per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Commit directly to the chain and return.
    MainState,
    /// Hand the block to the processing pipeline and wait for its verdict.
    WaitForProcessing { timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub genesis_block_num: u64,
    pub build_mode: BuildMode,
    pub prefetch: bool,
    pub safe_block_wait_for_validator: bool,
    pub finalized_block_wait_for_validator: bool,
    pub msg_lag: Duration,
    pub comparison: Option<ComparisonConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            genesis_block_num: 0,
            build_mode: BuildMode::MainState,
            prefetch: false,
            safe_block_wait_for_validator: false,
            finalized_block_wait_for_validator: false,
            msg_lag: Duration::from_secs(1),
            comparison: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonConfig {
    pub rpc_url: String,
    pub interval: u64,
    pub max_retries: u32,
}

impl ArbEngineArgs {
    pub fn into_config(self) -> eyre::Result<EngineConfig> {
        let Self { engine, comparison } = self;

        let build_mode = if engine.build_on_main_state {
            BuildMode::MainState
        } else {
            if engine.processing_timeout_ms == 0 {
                return Err(eyre!("--engine.processing_timeout_ms must be greater than zero"));
            }
            BuildMode::WaitForProcessing {
                timeout: Duration::from_millis(engine.processing_timeout_ms),
            }
        };

        if engine.msg_lag_ms == 0 {
            return Err(eyre!("--engine.msg_lag_ms must be greater than zero"));
        }

        let comparison = match comparison.rpc_url {
            Some(rpc_url) => {
                if comparison.interval == 0 {
                    return Err(eyre!("--comparison.interval must be greater than zero"));
                }
                if comparison.max_retries == 0 {
                    return Err(eyre!("--comparison.max_retries must be greater than zero"));
                }
                info!(
                    target: "arb::comparison",
                    url = %rpc_url,
                    interval = comparison.interval,
                    "comparing blocks against reference node"
                );
                Some(ComparisonConfig {
                    rpc_url,
                    interval: comparison.interval,
                    max_retries: comparison.max_retries,
                })
            }
            None => None,
        };

        if engine.prefetch && !engine.build_on_main_state {
            warn!(
                target: "arb::engine",
                "--engine.prefetch only applies when building on main state and is ignored"
            );
        }

        Ok(EngineConfig {
            genesis_block_num: engine.genesis_block_num,
            build_mode,
            prefetch: engine.prefetch && engine.build_on_main_state,
            safe_block_wait_for_validator: engine.safe_block_wait_for_validator,
            finalized_block_wait_for_validator: engine.finalized_block_wait_for_validator,
            msg_lag: Duration::from_millis(engine.msg_lag_ms),
            comparison,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use test_case::test_case;

    const URL: &str = "http://localhost:8547";

    #[derive(Debug, Parser)]
    struct CommandParser {
        #[command(flatten)]
        args: ArbEngineArgs,
    }

    #[test]
    fn defaults() {
        let args = CommandParser::parse_from(["bin"]).args;
        assert_eq!(args.engine, EngineArgs::default());
        assert_eq!(args.comparison.rpc_url, None);

        let config = args.into_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn wait_for_processing_mode() {
        let args = CommandParser::parse_from([
            "bin",
            "--engine.build_on_main_state",
            "false",
            "--engine.processing_timeout_ms",
            "250",
            "--engine.prefetch",
        ])
        .args;

        let config = args.into_config().unwrap();
        assert_eq!(
            config.build_mode,
            BuildMode::WaitForProcessing { timeout: Duration::from_millis(250) }
        );
        assert!(!config.prefetch);
    }

    #[test]
    fn comparison_args() {
        let args = CommandParser::parse_from([
            "bin",
            "--comparison.rpc_url",
            "http://localhost:8547",
            "--comparison.interval",
            "10",
        ])
        .args;

        let config = args.into_config().unwrap();
        assert_eq!(
            config.comparison,
            Some(ComparisonConfig {
                rpc_url: "http://localhost:8547".to_string(),
                interval: 10,
                max_retries: 100,
            })
        );
    }

    #[test_case(&["--comparison.rpc_url", URL, "--comparison.interval", "0"]; "zero interval")]
    #[test_case(&["--comparison.rpc_url", URL, "--comparison.max_retries", "0"]; "zero retries")]
    #[test_case(
        &["--engine.build_on_main_state=false", "--engine.processing_timeout_ms=0"];
        "zero timeout"
    )]
    #[test_case(&["--engine.msg_lag_ms", "0"]; "zero msg lag")]
    fn invalid_combinations_are_rejected(flags: &[&str]) {
        let argv = std::iter::once("bin").chain(flags.iter().copied());
        let args = CommandParser::parse_from(argv).args;
        assert!(args.into_config().is_err());
    }

    #[test]
    fn interval_without_url_is_ignored() {
        let args = CommandParser::parse_from(["bin", "--comparison.interval", "0"]).args;
        assert_eq!(args.into_config().unwrap().comparison, None);
    }

    #[test]
    fn invalid_number_fails_to_parse() {
        CommandParser::try_parse_from(["bin", "--engine.genesis_block_num", "-1"]).unwrap_err();
    }
}
