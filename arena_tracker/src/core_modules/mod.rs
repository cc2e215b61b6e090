pub mod background_histogram;
pub mod background_model;
pub mod blob;
pub mod blob_detector;
pub mod ellipse_fitter;
pub mod frame;
pub mod geometry;
pub mod heading_resolver;
pub mod history;
pub mod region_trigger;
pub mod roi;
pub mod segmenter;
pub mod track_buffer;
