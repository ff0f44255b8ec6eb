use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot create engine with zero variants")]
    NoVariants,

    #[error("variant {0} has zero segments")]
    EmptySegments(usize),

    #[error("window size must be positive")]
    InvalidWindowSize,

    #[error("variant index {index} out of range (0-{max})")]
    VariantOutOfRange { index: usize, max: usize },

    #[error("window state not initialized yet")]
    NotInitialized,

    #[error("window state already initialized with different totals")]
    AlreadyInitialized,

    #[error("state machine: {0}")]
    Fsm(#[from] raft_cluster::FsmError),

    #[error(transparent)]
    Cluster(#[from] raft_cluster::ClusterError),
}
