pub mod detection;
pub mod estimate;
pub mod pixel;
pub mod pixel_grid;
pub mod region;
pub mod scan_session;
pub mod severity;
pub mod utils;
