pub mod payments;
pub mod promotions;
pub mod reconciliation;
pub mod sessions;
pub mod stock;

pub use payments::PaymentOrchestrator;
pub use reconciliation::ReconciliationSweeper;
pub use sessions::SessionService;
pub use stock::{StockChannel, StockService};
