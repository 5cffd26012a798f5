pub mod audit;
pub mod config;
pub mod download;
pub mod fetch;
pub mod lock;
pub mod package;
pub mod partition;
pub mod paths;
pub mod pipeline;
pub mod reconcile;
pub mod store;
pub mod timestamp;
pub mod token;
pub mod util;
pub mod warn;
pub mod watermark;
