pub mod acl;
pub mod config;
pub mod error;
pub mod index;
pub mod path;
pub mod principal;
pub mod query;
pub mod repository;
pub mod resource;
pub mod store;
pub mod types;

pub use config::RepositoryConfig;
pub use error::{RepoError, RepoResult};
pub use path::Uri;
pub use principal::Principal;
pub use repository::Repository;

// Test-only printing helper: expands to tprintln! during tests and is absent otherwise.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In non-test builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
