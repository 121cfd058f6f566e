pub mod core;
pub mod info_worker;
pub mod list_worker;
pub mod pagination;
pub mod urls;
pub mod worker;

pub use core::Spider;
