//! Controllers
//!
//! Each controller is an in-memory projection over one or two storage-port
//! namespaces: validate, write through the port, update the projection,
//! publish on the messenger. Grounded on the teacher's
//! `redemption::queue::WithdrawalQueue` (`Arc<RwLock<HashMap<..>>>`
//! projection with async mutation methods) generalized across the six
//! domains this core needs instead of one withdrawal queue.

pub mod accounts;
pub mod approvals;
pub mod chain_registry;
pub mod network;
pub mod permissions;
pub mod transactions;

pub use accounts::AccountsController;
pub use approvals::ApprovalsController;
pub use chain_registry::ChainRegistryController;
pub use network::NetworkController;
pub use permissions::PermissionsController;
pub use transactions::TransactionsController;
