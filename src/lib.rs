//! Seat allotment predictor: turns an allotment report into per-college
//! cutoff summaries and answers "where could this rank get in" queries.

pub mod aggregator;
pub mod extractor;
pub mod lookup;
pub mod models;
pub mod query_log;
pub mod session;
pub mod telemetry;
