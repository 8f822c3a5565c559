pub mod history;
pub mod invalidate;
pub mod lock;
pub mod watch;
