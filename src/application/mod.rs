pub mod janitor;
pub mod ledger;
pub mod pickup;
pub mod reconciler;
pub mod reminder;
pub mod scheduler;
