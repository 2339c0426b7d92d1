pub mod conn;
pub mod publish;
pub mod subscribe;

mod args;
mod reporter;
mod runner;
