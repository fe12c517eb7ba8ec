pub mod accel;
pub mod config;
pub mod jobs;
pub mod scene;
pub mod tracer;
