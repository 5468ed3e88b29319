//! liraindex-evm — EVM log decoding, JSON-RPC chain client and the orchestrator.

pub mod abi;
pub mod builder;
pub mod client;
pub mod orchestrator;
pub mod queue;
pub mod rpc;
pub mod ws;

pub use builder::OrchestratorBuilder;
pub use client::{ChainClient, JsonRpcChainClient, RawLog};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use queue::StatsSnapshot;
pub use rpc::TransportError;
pub use ws::WsConfig;
