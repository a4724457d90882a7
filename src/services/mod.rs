pub mod bills;
pub mod charges;
pub mod notifications;
pub mod overdue;
pub mod scheduler;
pub mod slip_verification;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;
