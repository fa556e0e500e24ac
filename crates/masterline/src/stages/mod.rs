pub mod eq;
pub mod mastering;

pub use eq::{EqEngine, EqError, EqOutcome, EqSettings, EqSkipReason, EqStage, FfmpegEqEngine};
pub use mastering::{MasteringOutcome, MasteringSettings, MasteringStage, PassthroughReason};
