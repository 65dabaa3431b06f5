//! Presenter and audience pages rendered from `tera` templates.

use std::path::Path;

use tera::{Context, Tera};
use tracing::info;

use crate::errors::PagesError;

/// Template file for the presenter page.
pub const PRESENTER_TEMPLATE: &str = "presenter.html";
/// Template file for the audience page.
pub const AUDIENCE_TEMPLATE: &str = "audience.html";

/// A page the server can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Served at `/presenter_ui`.
    Presenter,
    /// Served at `/`.
    Audience,
}

impl Page {
    /// Template name backing this page.
    pub fn template(self) -> &'static str {
        match self {
            Self::Presenter => PRESENTER_TEMPLATE,
            Self::Audience => AUDIENCE_TEMPLATE,
        }
    }
}

/// Loaded templates plus the values they are rendered with.
#[derive(Debug)]
pub struct Pages {
    tera: Tera,
    domain_name: String,
}

impl Pages {
    /// Load every `*.html` template under `dir`.
    ///
    /// Fails if either page template is missing.
    pub fn load(dir: &Path, domain_name: impl Into<String>) -> Result<Self, PagesError> {
        let dir_str = dir
            .to_str()
            .ok_or_else(|| PagesError::InvalidPath(dir.display().to_string()))?;
        let pattern = format!("{}/**/*.html", dir_str.trim_end_matches('/'));
        let tera = Tera::new(&pattern)?;
        let pages = Self::checked(tera, domain_name.into())?;
        info!(dir = %dir.display(), "templates loaded");
        Ok(pages)
    }

    /// Build from in-memory template sources.
    pub fn from_templates(
        presenter: &str,
        audience: &str,
        domain_name: impl Into<String>,
    ) -> Result<Self, PagesError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (PRESENTER_TEMPLATE, presenter),
            (AUDIENCE_TEMPLATE, audience),
        ])?;
        Self::checked(tera, domain_name.into())
    }

    fn checked(tera: Tera, domain_name: String) -> Result<Self, PagesError> {
        for required in [PRESENTER_TEMPLATE, AUDIENCE_TEMPLATE] {
            if !tera.get_template_names().any(|name| name == required) {
                return Err(PagesError::MissingTemplate(required));
            }
        }
        Ok(Self { tera, domain_name })
    }

    /// Domain the pages point their `WebSocket` at.
    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Render a page.
    pub fn render(&self, page: Page) -> Result<String, PagesError> {
        let mut context = Context::new();
        context.insert("domain_name", &self.domain_name);
        Ok(self.tera.render(page.template(), &context)?)
    }
}
