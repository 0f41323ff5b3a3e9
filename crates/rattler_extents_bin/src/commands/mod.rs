pub mod info;
pub mod install;
pub mod manifest;
pub mod transcode;
