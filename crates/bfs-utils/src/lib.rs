pub mod background_runner;

pub use background_runner::BackgroundRunner;
