use tasks_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error")]
    Config(#[source] Box<figment::Error>),
}

impl From<figment::Error> for ProviderError {
    fn from(err: figment::Error) -> Self {
        ProviderError::Config(Box::new(err))
    }
}

impl ProviderError {
    /// The engine error behind this one, if any.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            ProviderError::Core(err) => Some(err),
            _ => None,
        }
    }
}
