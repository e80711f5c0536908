//! Behavioral stories for the reconciler, run against the in-memory platform
//!
//! ```bash
//! cargo test --test stories
//! ```

mod story_tests;
