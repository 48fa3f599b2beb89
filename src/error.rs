use thiserror::Error;

/// Errors starting the periodic tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("No free task slot")]
    RegistryFull,

    #[error("Failed to spawn task thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Tasks are already running")]
    AlreadyRunning,
}
