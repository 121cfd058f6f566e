pub mod gate;
pub mod item;
pub mod stage;

pub use gate::TokenGate;
pub use item::{Token, TokenInfo, WorkItem};
pub use stage::{QueueClosed, StageQueue};
