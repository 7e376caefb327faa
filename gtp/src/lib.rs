pub mod config;
pub mod coordinator;
pub mod demux;
pub mod error;
pub mod field;
pub mod protocol;
pub mod relay;
pub mod share;
pub mod testing;
pub mod wire;

pub use config::Config;
pub use error::GtpError;
pub use field::{FieldConfig, FieldElement};
