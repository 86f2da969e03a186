pub mod session;

pub use session::{CompletedSession, NewSession, SessionRecord, NO_TASK_TITLE};
