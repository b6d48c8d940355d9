pub mod realign;
pub mod stats;
