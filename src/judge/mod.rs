pub mod admit;
pub mod compare;
pub mod engine;
pub mod result;
pub mod scoring;
