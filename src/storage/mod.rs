pub mod dedup;
pub mod redis_bloom;
pub mod users;

// Re-export common types
pub use dedup::{Dedup, DedupStore, MemoryDedup};
pub use users::{UserProfile, UserStorage, UserStore};
