use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod department;
pub mod incident;
pub mod job;
pub mod upload;

// Re-export common models
pub use department::*;
pub use incident::*;
pub use job::*;
pub use upload::*;

/// Common trait for all entities
pub trait Entity: Send + Sync {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
}
