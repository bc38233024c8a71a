//! Flash sales: the time-window evaluator and the admin/public service.

mod service;
mod window;

pub use service::FlashSaleService;
pub use window::{
    discount_percentage, is_currently_active, is_expired, status, time_remaining, FlashSaleView,
    SaleStatus, TimeRemaining,
};
