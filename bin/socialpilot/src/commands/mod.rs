pub mod config_cmd;
pub mod run_cmd;
pub mod sessions;
