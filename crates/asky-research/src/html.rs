//! Dependency-free HTML extraction: readable text, title, and links.
//!
//! A small tag-scanning state machine rather than a full DOM parse; good
//! enough for main-content extraction with strict size caps.

use url::Url;

use crate::text::normalize_whitespace;
use crate::types::Link;

/// Output shape for the extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text with paragraph newlines.
    Text,
    /// Plain text with ATX `#` markers preserved for headings, so
    /// downstream section indexing can find structure.
    Markdown,
}

pub struct ExtractedHtml {
    pub text: String,
    pub title: String,
    pub links: Vec<Link>,
}

/// Container tags whose links are navigation noise, excluded when callers
/// ask for content links only.
const EXCLUDED_LINK_CONTAINERS: &[&str] = &["header", "nav", "footer", "aside"];

struct LinkCapture {
    href: String,
    label: String,
    in_excluded_container: bool,
}

pub fn extract_html(
    html: &str,
    base_url: &str,
    format: OutputFormat,
    max_text_chars: usize,
    exclude_nav_links: bool,
) -> ExtractedHtml {
    let base = Url::parse(base_url).ok();

    let mut out = String::new();
    let mut title = String::new();
    let mut links: Vec<Link> = Vec::new();

    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut in_title = false;
    let mut tag_buf = String::new();
    let mut container_depth = 0usize;
    let mut current_link: Option<LinkCapture> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_buf.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let tag_lower = tag_buf.to_lowercase();
                let tag_name = tag_lower
                    .trim_start_matches('/')
                    .split([' ', '\t', '\n', '/'])
                    .next()
                    .unwrap_or("")
                    .to_string();
                let is_closing = tag_lower.starts_with('/');

                match tag_name.as_str() {
                    "script" => in_script = !is_closing,
                    "style" => in_style = !is_closing,
                    "title" => in_title = !is_closing,
                    "a" => {
                        if is_closing {
                            if let Some(capture) = current_link.take() {
                                finish_link(capture, &base, &mut links, exclude_nav_links);
                            }
                        } else if let Some(href) = attr_value(&tag_buf, "href") {
                            current_link = Some(LinkCapture {
                                href,
                                label: String::new(),
                                in_excluded_container: container_depth > 0,
                            });
                        }
                    }
                    name if EXCLUDED_LINK_CONTAINERS.contains(&name) => {
                        if is_closing {
                            container_depth = container_depth.saturating_sub(1);
                        } else if !tag_lower.ends_with('/') {
                            container_depth += 1;
                        }
                    }
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        push_newline(&mut out);
                        if !is_closing && format == OutputFormat::Markdown {
                            let level = (tag_name.as_bytes()[1] - b'0') as usize;
                            out.push_str(&"#".repeat(level));
                            out.push(' ');
                        }
                    }
                    "p" | "div" | "li" | "tr" | "article" | "section" | "blockquote" => {
                        if is_closing {
                            push_newline(&mut out);
                        }
                    }
                    "br" => out.push('\n'),
                    _ => {}
                }
                tag_buf.clear();
            }
            _ if in_tag => tag_buf.push(ch),
            _ if in_script || in_style => {}
            _ if in_title => title.push(ch),
            _ => {
                if out.len() < max_text_chars {
                    out.push(ch);
                }
                if let Some(capture) = current_link.as_mut() {
                    capture.label.push(ch);
                }
            }
        }
    }
    ExtractedHtml {
        text: tidy_text(&decode_entities(&out), max_text_chars),
        title: normalize_whitespace(&decode_entities(&title)),
        links,
    }
}

fn finish_link(
    capture: LinkCapture,
    base: &Option<Url>,
    links: &mut Vec<Link>,
    exclude_nav_links: bool,
) {
    if exclude_nav_links && capture.in_excluded_container {
        return;
    }
    let href = capture.href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return;
    }
    let absolute = match base {
        Some(base) => match base.join(href) {
            Ok(joined) => joined.to_string(),
            Err(_) => return,
        },
        None => href.to_string(),
    };
    let label = normalize_whitespace(&decode_entities(&capture.label));
    links.push(Link { text: label, href: absolute });
}

/// Pull one attribute value out of a raw tag body.
fn attr_value(tag_body: &str, attr: &str) -> Option<String> {
    let lower = tag_body.to_lowercase();
    let pos = lower.find(&format!("{attr}="))?;
    let rest = &tag_body[pos + attr.len() + 1..];
    let rest = rest.trim_start();
    let (quote, rest) = match rest.chars().next() {
        Some(q @ ('"' | '\'')) => (Some(q), &rest[1..]),
        _ => (None, rest),
    };
    let end = match quote {
        Some(q) => rest.find(q)?,
        None => rest.find([' ', '\t', '\n', '>']).unwrap_or(rest.len()),
    };
    Some(rest[..end].to_string())
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn push_newline(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Collapse per-line whitespace while keeping paragraph structure.
fn tidy_text(text: &str, max_chars: usize) -> String {
    let mut result = String::new();
    let mut prev_blank = false;
    for line in text.lines() {
        let trimmed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if trimmed.is_empty() {
            if !prev_blank && !result.is_empty() {
                result.push('\n');
                prev_blank = true;
            }
        } else {
            result.push_str(&trimmed);
            result.push('\n');
            prev_blank = false;
        }
        if result.len() >= max_chars {
            break;
        }
    }
    let mut trimmed: String = result.trim().to_string();
    if trimmed.chars().count() > max_chars {
        trimmed = trimmed.chars().take(max_chars).collect();
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Test &amp; Page</title>
<style>body { color: red }</style></head>
<body>
<nav><a href="/login">Log in</a></nav>
<h1>Main Heading</h1>
<p>First paragraph with <a href="/docs">documentation link</a>.</p>
<script>var x = "<p>ignored</p>";</script>
<h2>Sub Heading</h2>
<p>Second paragraph.</p>
<footer><a href="/terms">Terms</a></footer>
</body></html>"#;

    #[test]
    fn extracts_title_text_and_content_links() {
        let result = extract_html(PAGE, "https://ex.com/base", OutputFormat::Text, 10_000, true);
        assert_eq!(result.title, "Test & Page");
        assert!(result.text.contains("Main Heading"));
        assert!(result.text.contains("First paragraph"));
        assert!(!result.text.contains("color: red"));
        assert!(!result.text.contains("ignored"));

        let hrefs: Vec<&str> = result.links.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, vec!["https://ex.com/docs"]);
        assert_eq!(result.links[0].text, "documentation link");
    }

    #[test]
    fn nav_links_included_when_not_excluded() {
        let result = extract_html(PAGE, "https://ex.com", OutputFormat::Text, 10_000, false);
        let hrefs: Vec<&str> = result.links.iter().map(|l| l.href.as_str()).collect();
        assert!(hrefs.contains(&"https://ex.com/login"));
        assert!(hrefs.contains(&"https://ex.com/terms"));
    }

    #[test]
    fn markdown_format_keeps_heading_markers() {
        let result = extract_html(PAGE, "https://ex.com", OutputFormat::Markdown, 10_000, true);
        assert!(result.text.contains("# Main Heading"));
        assert!(result.text.contains("## Sub Heading"));
    }

    #[test]
    fn text_is_capped() {
        let long = format!("<p>{}</p>", "word ".repeat(5000));
        let result = extract_html(&long, "https://ex.com", OutputFormat::Text, 100, true);
        assert!(result.text.chars().count() <= 100);
    }
}
