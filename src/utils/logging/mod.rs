//! Progress reporting for long-running stages

pub mod progress;

pub use progress::{create_main_progress_bar, create_spinner, finish_progress_bar};
