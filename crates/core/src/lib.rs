pub mod config;
pub mod conflict;
pub mod error;
pub mod field_value;
pub mod hlc;
pub mod ids;
pub mod snapshot;

pub use config::{EngineConfig, SuggestionConfig};
pub use conflict::*;
pub use error::CoreError;
pub use field_value::FieldValue;
pub use hlc::{Hlc, HlcClock};
pub use ids::*;
pub use snapshot::{FieldMap, RecordSnapshots, Snapshot};
