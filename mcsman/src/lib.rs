pub mod activity;
pub mod backup;
pub mod config;
pub mod crash;
pub mod info;
pub mod monitor;
pub mod query;
pub mod sched;
pub mod scripts;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod util;

pub use config::Config;
pub use store::StatusStore;
pub use supervisor::Supervisor;
