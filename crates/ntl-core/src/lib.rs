pub mod admin_join;
pub mod columns;
pub mod composite_normalizer;
pub mod config;
pub mod error;
pub mod extreme_flagger;
pub mod io;
pub mod pipeline;
pub mod schema;
pub mod stats;
pub mod window_averager;
