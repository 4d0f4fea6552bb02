pub mod anchor;
pub mod finality;
pub mod fork_choice;
pub mod log;
pub mod store;
pub mod validation;

pub use anchor::{Anchor, AnchorSink, AnchorVerdict, ExternalAnchorManager, MemoryAnchorSink};
pub use finality::{Checkpoint, CheckpointSource, FinalityManager};
pub use fork_choice::{ChainScore, ForkChoice};
pub use log::ChainLog;
pub use store::{ChainStore, ReorgOutcome};
pub use validation::validate_child;
