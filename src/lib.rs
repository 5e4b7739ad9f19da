
pub mod advert;
pub mod config;
pub mod error;
pub mod icmp6;
pub mod interface;
pub mod responder;
pub mod rtnl;
pub mod store;

pub use error::{Error, Result};
