pub mod config;
pub mod confound;
pub mod detectors;
pub mod error;
pub mod gather;
pub mod io;
pub mod metrics;
pub mod plot;
pub mod response;
pub mod signal;

pub use config::*;
pub use confound::*;
pub use detectors::*;
pub use error::*;
pub use gather::*;
pub use metrics::*;
pub use response::*;
pub use signal::*;
