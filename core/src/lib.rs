pub mod calendar;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod meals;
pub mod models;
pub mod polling;
pub mod scan;
pub mod session;
