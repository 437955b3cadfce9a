pub mod as_of;
pub mod assignments;
pub mod clades;
pub mod cladetime;
pub mod config;
pub mod error;
pub mod fs_util;
pub mod metadata;
pub mod ncbi;
pub mod output;
pub mod pipeline;
pub mod s3;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod tools;

pub use as_of::AsOf;
pub use cladetime::CladeTime;
pub use error::CladeTimeError;
