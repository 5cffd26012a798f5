pub mod client;

pub use client::SlackClient;
