pub mod bulk;
pub mod lookup;
pub mod parse;
pub mod payload;

pub use bulk::BulkController;
pub use lookup::LookupExecutor;
pub use payload::PayloadEncoder;
