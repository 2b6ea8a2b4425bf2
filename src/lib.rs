#[macro_use]
mod macros;

mod common;
pub mod config;
pub mod eval;
pub mod host;
pub mod logging;

pub use common::InstanceId;
pub use config::EvalConfig;
pub use eval::{ast, EvalError, EvalErrorKind, EvalResult, Evaluator, ValueId, ValueKind};
pub use host::{BufferHost, Host, StdoutHost};
pub use logging::{DummyLogger, FileLogger, Logger, VecLogger};
