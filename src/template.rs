//! Template rendering seam.

use serde_json::{Map, Value};

use crate::error::Error;

/// Renders a named template against a context mapping.
///
/// plinth ships no template language. Plug in whichever engine the
/// application uses; an unknown template should come back as
/// [`Error::Template`].
pub trait TemplateRenderer: Send + Sync + 'static {
    fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, Error>;
}
