//! Seeded synthetic data for tests and demonstrations


pub use fixtures::{SyntheticStudy, synthetic_study};
