pub mod composer;
pub mod points;

pub use composer::{PaymentChoice, compose, max_points_for_price};
pub use points::InMemoryPointsLedger;
