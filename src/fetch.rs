//! Source fetching and article extraction.
//!
//! Fetches a URL, pulls the readable article out of the HTML (boilerplate
//! like navigation, scripts, and footers is dropped), converts it to
//! markdown with ATX headings and fenced code blocks, and content-hashes
//! the result so the fetch pipeline can detect unchanged pages.
//!
//! Extraction is selector-driven: the first of `article`, `main`,
//! `[role=main]`, `#content`, `.content` that yields a substantial body
//! wins, falling back to `body`. A page with no extractable article is a
//! hard error — that usually means a genuinely unreadable page, not a
//! transient condition.

use anyhow::{bail, Context, Result};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

use crate::config::FetchConfig;
use crate::store::content_hash;

/// Candidate containers tried in priority order before falling back to body.
const CONTENT_SELECTORS: &[&str] = &["article", "main", "[role=main]", "#content", ".content"];

/// Minimum extracted text length for a candidate container to win.
const MIN_CONTENT_CHARS: usize = 100;

/// Elements whose subtrees never contribute article text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "form", "iframe", "svg",
];

/// A fetched page after extraction and conversion.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: Option<String>,
    pub markdown: String,
    pub etag: Option<String>,
    pub content_hash: String,
}

/// HTTP fetcher with a descriptive user agent and request timeout.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build fetch client")?;

        Ok(Self { client })
    }

    /// GET the URL and extract its article as markdown.
    ///
    /// Non-2xx responses and pages with no readable article are hard
    /// failures; the job queue's retry policy decides what happens next.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("failed to fetch {}: {}", url, status);
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let html = response.text().await?;
        let article = extract_article(&html)
            .with_context(|| format!("no readable article found at {}", url))?;

        let hash = content_hash(&article.markdown);

        Ok(FetchedPage {
            title: article.title,
            markdown: article.markdown,
            etag,
            content_hash: hash,
        })
    }
}

/// Extracted article: page title plus markdown body.
#[derive(Debug, Clone)]
pub struct Article {
    pub title: Option<String>,
    pub markdown: String,
}

/// Extract the main article from raw HTML and convert it to markdown.
///
/// Tolerates malformed or partial HTML (the parser recovers); errors only
/// when no candidate container yields any article text.
pub fn extract_article(html: &str) -> Result<Article> {
    let document = Html::parse_document(html);
    let title = extract_title(&document);

    for selector_str in CONTENT_SELECTORS {
        if let Some(element) = select_first(&document, selector_str) {
            let markdown = element_to_markdown(element);
            if markdown.len() > MIN_CONTENT_CHARS {
                return Ok(Article { title, markdown });
            }
        }
    }

    // Fall back to the whole body, boilerplate stripped by the renderer
    if let Some(body) = select_first(&document, "body") {
        let markdown = element_to_markdown(body);
        if !markdown.is_empty() {
            return Ok(Article { title, markdown });
        }
    }

    bail!("document contains no extractable article content")
}

fn select_first<'a>(document: &'a Html, selector_str: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector_str).ok()?;
    document.select(&selector).next()
}

/// Page title from `<title>`, falling back to the first `<h1>`.
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Some(element) = select_first(document, selector_str) {
            let text = normalize_ws(&element.text().collect::<String>());
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

// ============ HTML → markdown ============

/// Render an element subtree to markdown: ATX headings, fenced code
/// blocks, `-` bullet lists, `>` blockquotes, inline links and emphasis.
fn element_to_markdown(element: ElementRef) -> String {
    let mut blocks = Vec::new();
    render_block(element, &mut blocks);
    blocks.join("\n\n").trim().to_string()
}

fn render_block(element: ElementRef, blocks: &mut Vec<String>) {
    let tag = element.value().name();
    if SKIP_TAGS.contains(&tag) {
        return;
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = inline_text(element);
            if !text.is_empty() {
                blocks.push(format!("{} {}", "#".repeat(level), text));
            }
        }
        "p" => {
            let text = inline_text(element);
            if !text.is_empty() {
                blocks.push(text);
            }
        }
        "pre" => {
            let code = element.text().collect::<String>();
            let code = code.trim_matches('\n');
            if !code.trim().is_empty() {
                blocks.push(format!("```\n{}\n```", code));
            }
        }
        "ul" | "ol" => {
            let ordered = tag == "ol";
            let mut items = Vec::new();
            for (i, li) in element
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|e| e.value().name() == "li")
                .enumerate()
            {
                let text = inline_text(li);
                if text.is_empty() {
                    continue;
                }
                if ordered {
                    items.push(format!("{}. {}", i + 1, text));
                } else {
                    items.push(format!("- {}", text));
                }
            }
            if !items.is_empty() {
                blocks.push(items.join("\n"));
            }
        }
        "blockquote" => {
            let mut inner = Vec::new();
            render_children(element, &mut inner);
            let quoted = inner
                .join("\n\n")
                .lines()
                .map(|l| format!("> {}", l))
                .collect::<Vec<_>>()
                .join("\n");
            if !quoted.is_empty() {
                blocks.push(quoted);
            }
        }
        "hr" => blocks.push("---".to_string()),
        // Generic containers: recurse, collecting loose inline content
        // into paragraphs of their own
        _ => render_children(element, blocks),
    }
}

/// Walk a container's children: block elements recurse, runs of loose
/// text and inline elements collapse into paragraph blocks.
fn render_children(element: ElementRef, blocks: &mut Vec<String>) {
    let mut paragraph = String::new();

    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            if is_inline(el.value().name()) {
                let text = render_inline(el);
                if !text.is_empty() {
                    if !paragraph.is_empty() {
                        paragraph.push(' ');
                    }
                    paragraph.push_str(&text);
                }
                continue;
            }
            if !paragraph.trim().is_empty() {
                blocks.push(normalize_ws(&paragraph));
            }
            paragraph.clear();
            render_block(el, blocks);
        } else if let Some(text) = child.value().as_text() {
            let trimmed = normalize_ws(text);
            if !trimmed.is_empty() {
                if !paragraph.is_empty() {
                    paragraph.push(' ');
                }
                paragraph.push_str(&trimmed);
            }
        }
    }

    if !paragraph.trim().is_empty() {
        blocks.push(normalize_ws(&paragraph));
    }
}

fn is_inline(tag: &str) -> bool {
    matches!(
        tag,
        "a" | "strong" | "b" | "em" | "i" | "code" | "span" | "br" | "small" | "sub" | "sup"
            | "mark" | "abbr" | "time"
    )
}

/// Render an element's content as a single line of inline markdown.
fn inline_text(element: ElementRef) -> String {
    let mut out = String::new();
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            let rendered = render_inline(el);
            if !rendered.is_empty() {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
                out.push_str(&rendered);
            }
        } else if let Some(text) = child.value().as_text() {
            let t = normalize_ws(text);
            if !t.is_empty() {
                if !out.is_empty() && !out.ends_with(' ') {
                    out.push(' ');
                }
                out.push_str(&t);
            }
        }
    }
    normalize_ws(&out)
}

fn render_inline(element: ElementRef) -> String {
    let tag = element.value().name();
    if SKIP_TAGS.contains(&tag) {
        return String::new();
    }

    let inner = inline_text(element);
    match tag {
        "a" => {
            if inner.is_empty() {
                return String::new();
            }
            match element.value().attr("href") {
                Some(href) if !href.starts_with('#') => format!("[{}]({})", inner, href),
                _ => inner,
            }
        }
        "strong" | "b" => {
            if inner.is_empty() {
                String::new()
            } else {
                format!("**{}**", inner)
            }
        }
        "em" | "i" => {
            if inner.is_empty() {
                String::new()
            } else {
                format!("*{}*", inner)
            }
        }
        "code" => {
            if inner.is_empty() {
                String::new()
            } else {
                format!("`{}`", inner)
            }
        }
        "br" => String::new(),
        _ => inner,
    }
}

/// Collapse whitespace runs to single spaces.
fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_article_over_boilerplate() {
        let html = r#"
            <html><head><title>Test Page</title></head>
            <body>
                <nav>Site navigation that should disappear</nav>
                <article>
                    <h1>Release Notes</h1>
                    <p>This release improves the ingestion pipeline and fixes
                    several bugs in the chunking logic reported by users.</p>
                </article>
                <footer>Copyright footer</footer>
            </body></html>
        "#;

        let article = extract_article(html).unwrap();
        assert_eq!(article.title.as_deref(), Some("Test Page"));
        assert!(article.markdown.contains("# Release Notes"));
        assert!(article.markdown.contains("ingestion pipeline"));
        assert!(!article.markdown.contains("navigation"));
        assert!(!article.markdown.contains("Copyright"));
    }

    #[test]
    fn test_atx_heading_levels() {
        let html = r#"
            <article>
                <h1>One</h1>
                <p>Some opening paragraph content that is long enough to count
                as a real article for the extraction threshold.</p>
                <h2>Two</h2>
                <p>More content.</p>
                <h3>Three</h3>
                <p>Even more.</p>
            </article>
        "#;
        let article = extract_article(html).unwrap();
        assert!(article.markdown.contains("# One"));
        assert!(article.markdown.contains("## Two"));
        assert!(article.markdown.contains("### Three"));
    }

    #[test]
    fn test_fenced_code_blocks() {
        let html = r#"
            <article>
                <p>The following example shows how the configuration file is
                structured for a typical deployment of the service.</p>
                <pre><code>fn main() {
    println!("hi");
}</code></pre>
            </article>
        "#;
        let article = extract_article(html).unwrap();
        assert!(article.markdown.contains("```\nfn main() {"));
        assert!(article.markdown.ends_with("```"));
    }

    #[test]
    fn test_lists_and_links() {
        let html = r#"
            <article>
                <p>An introduction paragraph that pads this article above the
                minimum extraction threshold for candidate containers.</p>
                <ul><li>first item</li><li>second item</li></ul>
                <p>See <a href="https://example.com/docs">the docs</a> for more.</p>
            </article>
        "#;
        let article = extract_article(html).unwrap();
        assert!(article.markdown.contains("- first item"));
        assert!(article.markdown.contains("- second item"));
        assert!(article
            .markdown
            .contains("[the docs](https://example.com/docs)"));
    }

    #[test]
    fn test_title_falls_back_to_h1() {
        let html = r#"
            <html><body><main>
                <h1>Fallback Heading</h1>
                <p>Body content long enough to satisfy the extraction length
                threshold used for candidate containers in this module.</p>
            </main></body></html>
        "#;
        let article = extract_article(html).unwrap();
        assert_eq!(article.title.as_deref(), Some("Fallback Heading"));
    }

    #[test]
    fn test_empty_page_is_hard_error() {
        assert!(extract_article("<html><body></body></html>").is_err());
        assert!(extract_article("").is_err());
    }

    #[test]
    fn test_malformed_html_does_not_panic() {
        let html = "<article><p>Unclosed paragraph with enough text to pass the \
                    extraction threshold even though the markup is broken \
                    <div><span>stray nesting</article>";
        let article = extract_article(html).unwrap();
        assert!(article.markdown.contains("Unclosed paragraph"));
    }

    #[test]
    fn test_identical_content_hashes_equal() {
        let html = "<article><p>Stable content for hashing, padded out to pass \
                    the minimum article length threshold used by extraction.</p></article>";
        let a = extract_article(html).unwrap();
        let b = extract_article(html).unwrap();
        assert_eq!(content_hash(&a.markdown), content_hash(&b.markdown));
    }
}
