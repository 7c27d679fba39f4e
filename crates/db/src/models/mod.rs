pub mod render_job;
pub mod status;
