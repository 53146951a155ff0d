#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use scantrack_cache as cache;
pub use scantrack_core as core;
pub use scantrack_k8s_clients as clients;
pub use scantrack_k8s_index as index;

mod args;
mod fetch;
mod reader;

pub use self::{
    args::Args,
    fetch::{ApiFetcher, FetchReports},
    reader::Reader,
};
