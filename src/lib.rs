pub mod cli;
pub mod config;
pub mod engine;
pub mod format;
pub mod manifest;
pub mod outcome;
pub mod probe;
pub mod process;
pub mod registry;
pub mod strategy;
pub mod util;

pub use engine::Converter;
pub use format::{ConversionPair, Format};
pub use outcome::{ConversionError, ConversionOutcome, ConversionRequest, ErrorKind};
pub use process::{CancelToken, ProcessRunner, ToolCommand};
pub use registry::StrategyRegistry;
