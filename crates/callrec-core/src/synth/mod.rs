pub mod emitter;
pub mod generator;
