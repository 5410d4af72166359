pub mod batch;
pub mod process;
