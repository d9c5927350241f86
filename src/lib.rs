//! streamwatch - per-entity sliding-window analytics and alerting over event streams

pub mod pipeline;
