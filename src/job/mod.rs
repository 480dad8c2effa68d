pub mod health_check_job;

pub use health_check_job::HealthCheckJob;
