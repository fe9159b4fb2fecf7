pub mod log;
pub mod run;
