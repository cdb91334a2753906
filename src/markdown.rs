//! Markdown helpers for post pages: rendering to HTML and extracting the
//! readable text (for word counts and descriptions).

use pulldown_cmark::{html, Event, Options, Parser, Tag};

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Converts markdown to HTML, appending the result to `w`.
///
/// Headings in the post body are demoted one level to be subordinate to the
/// post title (h1), so `#` becomes h2.
pub fn to_html(w: &mut String, markdown: &str) {
    html::push_html(
        w,
        Parser::new_ext(markdown, options()).map(|ev| match ev {
            Event::Start(Tag::Heading(level)) => Event::Start(Tag::Heading(demote(level))),
            Event::End(Tag::Heading(level)) => Event::End(Tag::Heading(demote(level))),
            _ => ev,
        }),
    );
}

fn demote(level: u32) -> u32 {
    (level + 1).min(6)
}

/// Returns the text a reader would see, with markup, link targets and raw
/// HTML removed. Block boundaries become line breaks.
pub fn plain_text(markdown: &str) -> String {
    let mut text = String::with_capacity(markdown.len());
    for ev in Parser::new_ext(markdown, options()) {
        match ev {
            Event::Text(s) | Event::Code(s) => text.push_str(&s),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::End(tag) if is_block(&tag) => text.push('\n'),
            _ => {}
        }
    }
    text
}

/// Inline tags (emphasis, links and the like) sit inside words; only block
/// tags end a line.
fn is_block(tag: &Tag) -> bool {
    matches!(
        tag,
        Tag::Paragraph
            | Tag::Heading(_)
            | Tag::BlockQuote
            | Tag::CodeBlock(_)
            | Tag::List(_)
            | Tag::Item
            | Tag::FootnoteDefinition(_)
            | Tag::Table(_)
            | Tag::TableHead
            | Tag::TableRow
            | Tag::TableCell
    )
}

/// Escapes `s` for use inside HTML text or attribute values.
pub fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    // writing into a `String` can't fail
    let _ = pulldown_cmark::escape::escape_html(&mut escaped, s);
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_html_demotes_headings() {
        let mut html = String::new();
        to_html(&mut html, "# Title\n\n## Sub\n\n###### Deep\n\nSome *text*.");
        assert!(html.contains("<h2>Title</h2>"), "{}", html);
        assert!(html.contains("<h3>Sub</h3>"), "{}", html);
        assert!(html.contains("<h6>Deep</h6>"), "{}", html);
        assert!(html.contains("<em>text</em>"), "{}", html);
    }

    #[test]
    fn test_plain_text_strips_markup() {
        let text = plain_text("# Hello\n\nA [link](https://example.com) and `code`.\n\n<div>raw</div>");
        assert!(text.contains("Hello"));
        assert!(text.contains("A link and code."));
        assert!(!text.contains("https://example.com"));
        assert!(!text.contains("<div>"));
    }

    #[test]
    fn test_plain_text_keeps_inline_markup_within_words() {
        let text = plain_text("**bold**ly *very* ~~gone~~ [linked](https://example.com)text\n\n- one\n- two");
        assert!(text.contains("boldly very gone linkedtext"), "{:?}", text);
        assert_eq!(6, text.split_whitespace().count(), "{:?}", text);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!("&lt;b&gt; &amp; &quot;q&quot;", escape_html("<b> & \"q\""));
    }
}
