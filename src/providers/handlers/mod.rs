pub mod condition;
pub mod fs;
pub mod log;
pub mod shell;
pub mod subflow;
pub mod testing;

pub use self::condition::ConditionHandler;
pub use self::fs::FileHandler;
pub use self::log::LogHandler;
pub use self::shell::ShellHandler;
pub use self::subflow::SubflowHandler;
pub use self::testing::TestHandler;
