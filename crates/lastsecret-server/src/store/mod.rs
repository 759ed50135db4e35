pub mod crypto;
pub mod db;
pub mod ids;
pub mod model;

pub use db::{Limits, Store};
pub use model::{ConsumedSecret, SecretReceipt, SecretRecord};
