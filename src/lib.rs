pub mod command;
pub mod errors;
pub mod measure;
pub mod memwatch;
pub mod report;
pub mod session;
pub mod solar;
pub mod stats;
pub mod timing;
