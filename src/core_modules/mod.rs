pub mod blob;
pub mod blob_detector;
pub mod extent;
pub mod flicker;
pub mod half_float;
pub mod lighthouse;
pub mod tracker;
pub mod tracking_model;
