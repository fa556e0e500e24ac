pub mod runner;

pub use runner::{CommandOutput, Runner, RunnerError, TokioRunner};
