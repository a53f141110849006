pub mod app;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifetime;
pub mod packager;
pub mod project;
pub mod sandbox;
pub mod scripts;
pub mod telemetry;

pub use lifetime::{Collaborators, LifecycleEvent, LifetimeManager};
