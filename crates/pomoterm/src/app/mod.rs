pub mod cli;
pub mod cmd;
pub mod input;
pub mod render;
pub mod reply;
pub mod shell;
