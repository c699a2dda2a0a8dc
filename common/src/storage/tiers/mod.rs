pub mod kv;
pub mod remote;
