//! Browser control over the Chrome DevTools Protocol: process launch, isolated
//! per-platform contexts, and a resilient interaction layer on top of a
//! [`PageControl`] handle.

pub mod cdp;
pub mod interaction;
pub mod launch;
pub mod manager;
pub mod page;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use interaction::{ClickTier, DiagnosticSink, Interaction, InteractionEvent, TracingSink};
pub use manager::{capture_session, hydrate_page, ContextManager, HydrateReport};
pub use page::{CdpPage, ElementBox, Locator, PageControl, TextCandidate};
