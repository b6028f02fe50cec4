pub mod commands;
pub mod handlers;
pub mod presenter;

pub use commands::{Cli, Commands};
pub use presenter::TerminalPresenter;
