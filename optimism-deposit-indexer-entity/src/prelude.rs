pub use super::optimism_deposits::Entity as OptimismDeposits;
