pub mod client;
pub mod token;

pub use client::ReqwestPortalClient;
pub use token::TokenCache;
