pub mod calculator;

pub use calculator::{FeeBreakdown, FeeCalculator, MultiSellerBreakdown, SuborderInput};
