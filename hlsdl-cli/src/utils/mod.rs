mod headers;
pub mod progress;
pub mod prompt;

pub use self::headers::parse_headers;
