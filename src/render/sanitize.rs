//! HTML sanitization via ammonia.
//!
//! The default ammonia policy keeps user-generated-content markup (headings,
//! lists, tables, links, images) and drops scripts, event handlers, styles and
//! `javascript:` URLs.

use super::Sanitizer;

#[derive(Debug, Clone, Copy, Default)]
pub struct AmmoniaSanitizer;

impl Sanitizer for AmmoniaSanitizer {
    fn sanitize(&self, html: &str) -> String {
        ammonia::clean(html)
    }
}
