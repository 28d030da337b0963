pub mod id;
pub mod plan;
pub mod policy;
pub mod settings;
