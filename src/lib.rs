pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod export;
pub mod ident;
pub mod merge;
pub mod pivot;
pub mod query;
pub mod scan;
pub mod security;

pub use engine::{Engine, ExportSummary, Snapshot};
pub use error::{FusionError, FusionResult};

// Test-only printing helper: expands to eprintln! in test and debug builds and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
