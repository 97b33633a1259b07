pub mod aggregate;
pub mod api;
pub mod config;
pub mod deck;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod tag;
