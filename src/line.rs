//! A single line of a markdown document together with the links it holds.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::link::{Link, LinkScope, Rewrite};
use crate::registry::RunContext;

/// Inline `](target)` and reference-style `]: target` links.
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\](?:\(|:\s)([^)\n\s]+)\)?").expect("link regex"));

#[derive(Debug, Clone)]
pub struct Line {
    text: String,
    source: String,
    rendered: String,
    links: Vec<Link>,
}

/// Every link captured in `text`, in order of discovery.
///
/// Each captured value is blanked out before scanning again, so two links on one
/// line are found independently and offsets stay aligned with the original text.
pub fn scan(text: &str) -> Vec<Link> {
    let mut scan = text.to_string();
    let mut links = Vec::new();
    while let Some(value) = LINK.captures(&scan).and_then(|caps| caps.get(1)) {
        let range = value.range();
        links.push(Link::new(&text[range.clone()], range.start));
        scan.replace_range(range.clone(), &" ".repeat(range.len()));
    }
    links
}

pub fn has_links(text: &str) -> bool {
    LINK.is_match(text)
}

impl Line {
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            source: text.to_string(),
            rendered: text.to_string(),
            links: scan(text),
        }
    }

    /// The line as it should be written back to markdown.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The line as it should appear in the rendered page.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn links_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.iter_mut()
    }

    pub fn settle(&mut self, scope: &LinkScope<'_>) {
        for link in &mut self.links {
            link.settle(scope);
        }
    }

    /// Commits resolved links to the change log and refreshes both line variants.
    pub fn submit(&mut self, scope: &LinkScope<'_>, ctx: &RunContext) {
        for link in &mut self.links {
            let (rewrite, notes) = link.take_submission();
            if let Some(rewrite) = rewrite {
                ctx.register_change(
                    scope.path,
                    &self.text,
                    link.span().start,
                    link.value(),
                    &rewrite,
                );
            }
            ctx.record(notes);
        }
        self.rebuild();
    }

    /// Re-applies every resolved link to the original text.
    fn rebuild(&mut self) {
        let mut resolved: Vec<(std::ops::Range<usize>, &Rewrite)> = self
            .links
            .iter()
            .filter_map(|link| link.rewrite().map(|rw| (link.span(), rw)))
            .collect();
        resolved.sort_by_key(|(span, _)| span.start);

        let mut source = String::with_capacity(self.text.len());
        let mut rendered = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for (span, rewrite) in resolved {
            if span.start < cursor {
                continue;
            }
            source.push_str(&self.text[cursor..span.start]);
            rendered.push_str(&self.text[cursor..span.start]);
            source.push_str(&rewrite.source);
            rendered.push_str(&rewrite.rendered);
            cursor = span.end;
        }
        source.push_str(&self.text[cursor..]);
        rendered.push_str(&self.text[cursor..]);

        self.source = source;
        self.rendered = rendered;
    }
}
