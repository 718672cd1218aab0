//! `AquaSense` Runtime
//!
//! Runs without a user session, as the unauthenticated runtime principal:
//! - Executes due feeding schedules through a configurable [`feeder::Feeder`]
//! - Folds readings and logs into hourly, daily, weekly and monthly reports
//! - Stores sensor readings handed to it by pond devices

pub mod aggregation;
pub mod error;
pub mod feeder;
pub mod feeding;
pub mod ingest;
pub mod runner;

pub use error::{FeedError, RuntimeError};
pub use runner::{Runtime, TickReport};
