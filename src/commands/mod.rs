pub mod build;
pub mod remote;
