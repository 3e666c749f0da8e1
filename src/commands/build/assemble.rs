use crate::commands::inventory::DiscoveredChapter;
use crate::transform::safety::{CONTENT_END, CONTENT_START};
use crate::util::{escape_attr, escape_text};

/// What one page contributes to the shell.
pub(super) struct PageSpec<'a> {
    pub title: &'a str,
    pub body: &'a str,
    /// Chapter number of the page, `None` for the bibliography.
    pub active: Option<u32>,
    /// `<li>` items of the page's own table of contents.
    pub local_toc: &'a str,
}

/// Fixed page skeleton around a content fragment: one sidebar with the
/// chapter list, one top bar with prev/next buttons, one content container
/// delimited by the content markers. The output depends only on its inputs,
/// so re-assembling unchanged content gives identical bytes.
pub(super) struct PageShell<'a> {
    chapters: &'a [DiscoveredChapter],
    bibliography_page: &'a str,
}

impl<'a> PageShell<'a> {
    pub fn new(chapters: &'a [DiscoveredChapter], bibliography_page: &'a str) -> Self {
        Self {
            chapters,
            bibliography_page,
        }
    }

    pub fn render(&self, page: &PageSpec<'_>) -> String {
        let title = escape_text(page.title);
        format!(
            concat!(
                "<!DOCTYPE html>\n",
                "<html lang=\"en\">\n",
                "<head>\n",
                "<meta charset=\"utf-8\">\n",
                "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n",
                "<title>{title}</title>\n",
                "<link rel=\"stylesheet\" href=\"css/book.css\">\n",
                "</head>\n",
                "<body id=\"page-top-body\">\n",
                "<aside class=\"sidebar\" id=\"sidebar\">\n{sidebar}</aside>\n",
                "<div class=\"main-wrapper\">\n",
                "<header class=\"top-bar\" id=\"topbar\">\n",
                "<div class=\"page-title\">{title}</div>\n",
                "<div class=\"nav-btns\">{nav}</div>\n",
                "</header>\n",
                "<main class=\"content-scroll\" id=\"content_area\">\n",
                "<div class=\"container\">\n",
                "<div class=\"card\">\n",
                "<div class=\"card-body\" id=\"doc_content\">\n",
                "{start}\n{body}\n{end}\n",
                "</div>\n",
                "</div>\n",
                "</div>\n",
                "</main>\n",
                "</div>\n",
                "<script src=\"js/book.js\"></script>\n",
                "</body>\n",
                "</html>\n",
            ),
            title = title,
            sidebar = self.sidebar(page),
            nav = self.nav_buttons(page.active),
            start = CONTENT_START,
            body = page.body.trim(),
            end = CONTENT_END,
        )
    }

    fn sidebar(&self, page: &PageSpec<'_>) -> String {
        let bibliography_active = if page.active.is_none() { " active" } else { "" };
        let mut out = String::from("<div class=\"sidebar-header\"><a href=\"index.html\">Home</a></div>\n");
        out.push_str("<ul class=\"chapter-list\">\n");
        out.push_str(&format!(
            "<li class=\"chapter-item{bibliography_active}\"><a href=\"{}\">Bibliography</a></li>\n",
            escape_attr(self.bibliography_page)
        ));

        for chapter in self.chapters {
            let active = page.active == Some(chapter.number);
            out.push_str(&format!(
                "<li class=\"chapter-item{}\"><a href=\"{}\">Lecture {}: {}</a>",
                if active { " active" } else { "" },
                escape_attr(&chapter.filename),
                chapter.number,
                escape_text(&chapter.title)
            ));
            if active && !page.local_toc.is_empty() {
                out.push_str("<ul class=\"local-toc\">\n");
                out.push_str(page.local_toc);
                out.push_str("</ul>");
            }
            out.push_str("</li>\n");
        }
        out.push_str("</ul>\n");
        out
    }

    fn nav_buttons(&self, active: Option<u32>) -> String {
        let Some(number) = active else {
            return String::new();
        };
        let Some(position) = self.chapters.iter().position(|chapter| chapter.number == number)
        else {
            return String::new();
        };

        let mut out = String::new();
        if let Some(prev) = position.checked_sub(1).and_then(|index| self.chapters.get(index)) {
            out.push_str(&format!(
                "<a class=\"nav-btn prev\" href=\"{}\">Previous</a>",
                escape_attr(&prev.filename)
            ));
        }
        if let Some(next) = self.chapters.get(position + 1) {
            out.push_str(&format!(
                "<a class=\"nav-btn next\" href=\"{}\">Next</a>",
                escape_attr(&next.filename)
            ));
        }
        out
    }
}
