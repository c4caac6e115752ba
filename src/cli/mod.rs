pub mod bypass;
pub mod check;
pub mod git;
pub mod init;
pub mod log;
