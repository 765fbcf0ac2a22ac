//! CommonMark rendering via pulldown-cmark.

use pulldown_cmark::{html, Options, Parser};

use super::{RenderError, Renderer};

/// Renders GitHub-flavoured markdown (tables, strikethrough, task lists,
/// footnotes).
#[derive(Debug, Clone)]
pub struct PulldownRenderer {
    options: Options,
}

impl PulldownRenderer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        Self { options }
    }
}

impl Default for PulldownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PulldownRenderer {
    fn render(&self, markdown: &[u8]) -> Result<String, RenderError> {
        let source = std::str::from_utf8(markdown).map_err(|_| RenderError::InvalidUtf8)?;
        let parser = Parser::new_ext(source, self.options);
        let mut out = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut out, parser);
        Ok(out)
    }
}
