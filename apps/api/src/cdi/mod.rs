pub mod analyzer;
pub mod handlers;
pub mod history;
pub mod prompts;
pub mod raf;
