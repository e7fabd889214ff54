use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] barvault_core::ValidationError),

    #[error(transparent)]
    Core(#[from] barvault_core::CoreError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) | Self::Command(_) => 2,
            Self::Core(error) => match error.code() {
                "core.validation" | "core.config" => 2,
                "core.job_not_found" => 4,
                "core.serialization" => 4,
                _ => 10,
            },
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
