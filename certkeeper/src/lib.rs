//! Acquire TLS certificates, keep a backup in an object store and publish the
//! certificate material to etcd.

pub mod archive;
pub mod backup;
pub mod bot;
pub mod bucket;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod etcd;
pub mod exec;
pub mod http;
pub mod writer;
