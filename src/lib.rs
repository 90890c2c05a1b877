//! arbwatch - profit aggregation and caching for the arbitrage bot dashboard

pub mod profit;
