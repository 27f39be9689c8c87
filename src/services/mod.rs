// Shop domain services
pub mod commerce;

// Payment reconciliation
pub mod payments;
