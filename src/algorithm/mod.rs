//! Algorithm implementations for the evaluation workflow
//!
//! This module contains the matching engine and the balance assessment of
//! its matched sets.

pub mod matching;
