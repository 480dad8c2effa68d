pub mod notification_service;
pub mod position_view;
pub mod rebalance_service;
pub mod refill_service;
pub mod risk_service;
pub mod scheduler_service;
