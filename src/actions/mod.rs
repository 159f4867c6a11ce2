//! Action execution.
//!
//! The executor turns a match outcome into provider side effects, gated
//! by the executed-rule record so redeliveries never act twice. Template
//! expansion for static action text lives in [`template`].

pub mod executor;
pub mod template;

pub use executor::ActionExecutor;
pub use template::TemplateEngine;
