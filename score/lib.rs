#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod cohort;
pub mod config;
pub mod downcast;
pub mod model;
pub mod omics;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod reconcile;
pub mod variables;
