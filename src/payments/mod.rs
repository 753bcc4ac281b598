pub mod gateway;

pub use gateway::{HmacRedirectGateway, PaymentGateway, RedirectRequest};
