mod checkpoint;
mod generation;
mod importance;
mod routing;

pub use checkpoint::{
    parse_cross_job, CheckpointId, CheckpointRefError, CheckpointRefResolver, CROSS_JOB_SCHEME,
};
pub use generation::HotloadGeneration;
pub use importance::{CorrectedBatch, ImportanceCorrector, ImportanceStats, SequenceSample};
pub use routing::{align_routing_trace, AlignedRouting, RoutingTraceStore, TokenRouting};
