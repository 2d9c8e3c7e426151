mod domain;
mod error;
mod response;

pub use domain::DomainKey;
pub use error::ErrorKind;
pub use response::Response;

/// The courtesy `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
