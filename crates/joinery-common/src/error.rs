use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// The ledger table could not be created or read. Nothing was applied.
    #[error("migration ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// A migration body failed (or its transaction could not commit).
    #[error("migration {name} failed: {reason}")]
    Migration { name: String, reason: String },

    #[error("migration {0} is already recorded in the ledger")]
    DuplicateName(String),

    /// The body ran to completion but the ledger row was never written.
    /// The schema now carries changes the ledger does not know about.
    #[error("migration {name} was applied but could not be recorded: {reason}")]
    PartialApplication { name: String, reason: String },

    #[error("migration {0} is declared more than once in the catalog")]
    DuplicateDefinition(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Name of the migration this error is attributed to, if any.
    pub fn migration_name(&self) -> Option<&str> {
        match self {
            Error::Migration { name, .. }
            | Error::PartialApplication { name, .. }
            | Error::DuplicateName(name)
            | Error::DuplicateDefinition(name) => Some(name),
            _ => None,
        }
    }
}
