pub mod entities;
mod seaorm;
mod storage;

pub use seaorm::SeaOrmStorage;
pub use storage::{GlobalConfigRow, Storage, StorageError, StorageResult};
