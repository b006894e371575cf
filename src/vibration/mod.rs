pub mod pattern;
pub mod port;
pub mod scheduler;
pub mod timeline;
