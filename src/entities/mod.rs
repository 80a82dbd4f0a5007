pub mod attendee;
pub mod event;
pub mod order;
pub mod order_item;
pub mod payment_session;
pub mod product;
pub mod promo_code;
pub mod registration;
pub mod ticket;
pub mod visitor;
