//! Content-addressed render pipeline.
//!
//! Requests are keyed by [`Fingerprint`](crate::domain::fingerprint::Fingerprint).
//! A published artifact is reused forever; a miss resolves, expands and
//! compiles the template once per fingerprint no matter how many callers are
//! waiting on it. Failures and missing templates are never cached.

mod facade;
mod pipeline;
mod runtime;
mod types;

pub use facade::RenderService;
pub use pipeline::RenderPipeline;
pub use runtime::{Flight, InFlightRenders};
pub use types::{RenderError, RenderOutcome};
