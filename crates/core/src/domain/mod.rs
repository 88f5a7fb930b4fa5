pub mod configuration;
mod payload;
pub mod pricing_rule;
pub mod product;
pub mod rule;
pub mod selection;
