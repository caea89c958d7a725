pub mod attendance;
pub mod core;
pub mod metadata;
pub mod results;
pub mod settings;
pub mod students;
pub mod subjects;
