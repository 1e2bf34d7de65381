pub mod error;
pub mod gauge;
pub mod key;
pub mod labels;
pub mod registry;

pub use error::{Error, Result};
pub use gauge::{GaugeHandle, GaugeSeriesSummary};
pub use key::KeyId;
pub use labels::LabelValues;
pub use registry::{GaugeId, Registry};
