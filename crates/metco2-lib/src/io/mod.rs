pub mod confounds;
pub mod physio;
pub mod text;

pub use confounds::{
    format_confound_matrix, parse_confound_matrix, read_confound_matrix, write_confound_matrix,
};
pub use physio::{load_recording, recording_label};
pub use text::{parse_f64_series, read_f64_series};
