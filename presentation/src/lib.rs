pub mod cli;
pub mod output;
pub mod repl;
