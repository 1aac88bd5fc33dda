//! minimart-indexer-evm: EVM log source, MiniMart decoding, chain scanner
//! and pipeline orchestration.

pub mod builder;
pub mod decoder;
pub mod fetcher;
pub mod http;
pub mod pipeline;
pub mod rpc;
pub mod scanner;
pub mod subscription;

pub use builder::IndexerBuilder;
pub use decoder::{EventKind, MiniMartDecoder};
pub use fetcher::{EvmRpcClient, LogFilter, RawLog};
pub use http::{HttpClientConfig, HttpRpcClient};
pub use pipeline::{Pipeline, PipelineReport};
pub use scanner::{BackfillReport, ChainScanner};
pub use subscription::{LogStream, LogSubscriber, PollingSubscriber};
