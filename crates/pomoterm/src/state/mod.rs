pub mod ledger;
pub mod model;
pub mod query;
pub mod timer;
