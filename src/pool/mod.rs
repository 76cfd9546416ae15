pub mod account;
pub mod proxy;

pub use account::AccountPool;
pub use proxy::ProxyPool;
