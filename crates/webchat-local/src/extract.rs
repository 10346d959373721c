/// Render a whole HTML page as wrapped plain text.
///
/// Used when no single block of the page clearly beats the full rendering.
/// A body html2text cannot parse comes back unchanged.
pub fn html_to_text(html: &str, width: usize) -> String {
    html2text::from_read(html.as_bytes(), width).unwrap_or_else(|_| html.to_string())
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

/// Extract text from a PDF body (in-memory bytes).
pub fn pdf_to_text(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

/// Best-effort sniff for PDF bytes (magic header).
pub fn bytes_look_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Leading markup that marks a body as an HTML document, compared case-insensitively.
const HTML_PREFIXES: [&[u8]; 4] = [b"<!doctype", b"<html", b"<head", b"<body"];

/// Best-effort guess for whether bytes are HTML-ish.
pub fn bytes_look_like_html(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let rest = &bytes[start..];
    HTML_PREFIXES
        .iter()
        .any(|p| rest.len() >= p.len() && rest[..p.len()].eq_ignore_ascii_case(p))
}

/// Class/id fragments of page chrome that never holds the answer text.
const CHROME_MARKERS: [&str; 14] = [
    "nav", "navbar", "menu", "sidebar", "footer", "header", "banner", "cookie", "consent", "ads",
    "advert", "promo", "subscribe", "newsletter",
];

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_page_chrome(el: &html_scraper::ElementRef) -> bool {
    let s = class_or_id_lc(el);
    !s.is_empty() && CHROME_MARKERS.iter().any(|m| s.contains(m))
}

fn element_text_chars(el: &html_scraper::ElementRef) -> usize {
    el.text().map(|t| t.chars().count()).sum()
}

fn element_link_text_chars(el: &html_scraper::ElementRef) -> usize {
    let Ok(sel) = html_scraper::Selector::parse("a") else {
        return 0;
    };
    el.select(&sel)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

/// Blocks shorter than this are never picked; small single-article pages still qualify.
const MIN_BLOCK_CHARS: usize = 20;
/// Each character of link text cancels this many characters of plain text.
const LINK_CHAR_WEIGHT: i64 = 2;
const ARTICLE_BONUS: i64 = 500;
const MAIN_BONUS: i64 = 300;
/// Per `<p>` inside the block: answers come from prose, not tables or widgets.
const PARAGRAPH_BONUS: i64 = 40;
/// Applied once when link text is more than half of the block.
const LINK_HEAVY_PENALTY: i64 = 500;

fn block_score(el: &html_scraper::ElementRef, p_sel: &html_scraper::Selector) -> Option<i64> {
    let txt = element_text_chars(el);
    if txt < MIN_BLOCK_CHARS {
        return None;
    }
    let link_txt = element_link_text_chars(el);
    let paragraphs = el.select(p_sel).count() as i64;
    let mut score = txt as i64 - LINK_CHAR_WEIGHT * link_txt as i64 + PARAGRAPH_BONUS * paragraphs;
    score += match el.value().name() {
        "article" => ARTICLE_BONUS,
        "main" => MAIN_BONUS,
        _ => 0,
    };
    if link_txt > txt / 2 {
        score -= LINK_HEAVY_PENALTY;
    }
    Some(score)
}

/// Highest-scoring content block among the first `max_elems` candidates.
/// Ties keep the earlier block, so an outer wrapper beats an identical child.
fn pick_main_text(html: &str, max_elems: usize) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let block_sel = html_scraper::Selector::parse("article, main, section, div").ok()?;
    let p_sel = html_scraper::Selector::parse("p").ok()?;

    let mut best: Option<(i64, html_scraper::ElementRef)> = None;
    for el in doc
        .select(&block_sel)
        .take(max_elems.clamp(50, 50_000))
        .filter(|el| !is_page_chrome(el))
    {
        let Some(score) = block_score(&el, &p_sel) else {
            continue;
        };
        if score > 0 && best.as_ref().map_or(true, |(b, _)| score > *b) {
            best = Some((score, el));
        }
    }
    best.map(|(_, el)| norm_ws(&el.text().collect::<Vec<_>>().join(" ")))
}

/// Text of the densest article-like block, if any block qualifies.
pub fn html_main_to_text(html: &str) -> Option<String> {
    let out = pick_main_text(html, 20_000)?;
    has_any_text(&out).then_some(out)
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub engine: &'static str,
    pub text: String,
    pub warnings: Vec<&'static str>,
}

impl ExtractedText {
    pub fn is_empty(&self) -> bool {
        !has_any_text(&self.text)
    }
}

/// Clip to at most `max_chars` characters. Returns `(text, clipped)`.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => (s[..byte].to_string(), true),
        None => (s.to_string(), false),
    }
}

fn content_type_lc_prefix(ct: Option<&str>) -> String {
    ct.unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Elements whose bodies are never readable text.
const NON_CONTENT_TAGS: [&str; 3] = ["script", "style", "noscript"];

/// Position just past the `</tag>` closing the element opened at `start`.
fn block_end(lower: &str, start: usize, tag: &str) -> Option<usize> {
    let close = format!("</{tag}>");
    lower[start..].find(&close).map(|rel| start + rel + close.len())
}

/// Tag name opened at `pos` when it is one of `tags` (`<scripts>` is not `<script>`).
fn opened_tag<'t>(lower: &str, pos: usize, tags: &[&'t str]) -> Option<&'t str> {
    let rest = lower[pos..].strip_prefix('<')?;
    tags.iter().copied().find(|t| {
        rest.strip_prefix(t)
            .and_then(|after| after.chars().next())
            .is_some_and(|c| c == '>' || c == '/' || c.is_ascii_whitespace())
    })
}

/// Drop `<tag ...>...</tag>` blocks for each of `tags`, ASCII-case-insensitively.
/// An unclosed block and everything after it are kept as-is.
fn strip_blocks(html: &str, tags: &[&str]) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut copied = 0usize;
    let mut pos = 0usize;
    while let Some(rel) = lower[pos..].find('<') {
        let start = pos + rel;
        let Some(tag) = opened_tag(&lower, start, tags) else {
            pos = start + 1;
            continue;
        };
        let Some(end) = block_end(&lower, start, tag) else {
            break;
        };
        out.push_str(&html[copied..start]);
        copied = end;
        pos = end;
    }
    out.push_str(&html[copied..]);
    out
}

const URL_PENALTY: i64 = 200;
/// Lines this short are usually menu entries or buttons.
const SHORT_LINE_CHARS: usize = 30;
const SHORT_LINE_PENALTY: i64 = 20;
const BOILERPLATE_PENALTY: i64 = 250;
const BOILERPLATE_PHRASES: [&str; 9] = [
    "sign up",
    "sign in",
    "log in",
    "login",
    "cookie",
    "consent",
    "privacy",
    "terms",
    "all rights reserved",
];
/// The main block replaces the whole page only when it scores at least this much higher.
const MAIN_BLOCK_MARGIN: i64 = 300;

/// How much a rendering reads like prose worth quoting to the model.
fn prose_score(s: &str) -> i64 {
    let non_ws = s.chars().filter(|c| !c.is_whitespace()).count() as i64;
    let url_hits = s.matches("http").count() as i64;
    let short_lines = s
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && l.chars().count() <= SHORT_LINE_CHARS)
        .count() as i64;
    let lower = s.to_ascii_lowercase();
    let boilerplate: i64 = BOILERPLATE_PHRASES
        .iter()
        .map(|p| lower.matches(p).count() as i64)
        .sum();

    non_ws
        - URL_PENALTY * url_hits
        - SHORT_LINE_PENALTY * short_lines
        - BOILERPLATE_PENALTY * boilerplate
}

/// Extract boilerplate-reduced plain text from a fetched page body.
///
/// - PDF: pdf-extract.
/// - Markdown/text/json/xml: passed through as text.
/// - HTML: main-content block when clearly better, otherwise whole-page html2text.
/// - Anything else: empty text plus a warning.
pub fn best_effort_text_from_bytes(
    bytes: &[u8],
    content_type: Option<&str>,
    width: usize,
) -> ExtractedText {
    let mut warnings: Vec<&'static str> = Vec::new();

    let ct0 = content_type_lc_prefix(content_type);
    if ct0 == "application/pdf" || bytes_look_like_pdf(bytes) {
        return match pdf_to_text(bytes) {
            Ok(t) => ExtractedText {
                engine: "pdf-extract",
                text: t,
                warnings,
            },
            Err(_) => {
                warnings.push("pdf_extract_failed");
                ExtractedText {
                    engine: "pdf-extract",
                    text: String::new(),
                    warnings,
                }
            }
        };
    }

    if ct0.starts_with("image/") || ct0.starts_with("video/") || ct0.starts_with("audio/") {
        warnings.push("unsupported_content_no_text");
        return ExtractedText {
            engine: "unknown",
            text: String::new(),
            warnings,
        };
    }

    let is_markdown = ct0 == "text/markdown" || ct0 == "text/x-markdown";
    let is_json = ct0 == "application/json" || ct0.ends_with("+json");
    let is_xml = ct0 == "application/xml" || ct0 == "text/xml" || ct0.ends_with("+xml");
    let is_text = (ct0.starts_with("text/") && ct0 != "text/html") || is_markdown || is_json || is_xml;
    if is_text && !bytes_look_like_html(bytes) {
        let engine = if is_markdown {
            "markdown"
        } else if is_json {
            "json"
        } else if is_xml {
            "xml"
        } else {
            "text"
        };
        return ExtractedText {
            engine,
            text: String::from_utf8_lossy(bytes).to_string(),
            warnings,
        };
    }

    let html = strip_blocks(&String::from_utf8_lossy(bytes), &NON_CONTENT_TAGS);
    let full = html_to_text(&html, width);
    let full_ok = has_any_text(&full);

    if let Some(main) = html_main_to_text(&html) {
        if !full_ok || prose_score(&main) >= prose_score(&full) + MAIN_BLOCK_MARGIN {
            warnings.push("boilerplate_reduced");
            return ExtractedText {
                engine: "html_main",
                text: main,
                warnings,
            };
        }
    }

    if full_ok {
        return ExtractedText {
            engine: "html2text",
            text: full,
            warnings,
        };
    }

    warnings.push("unsupported_content_no_text");
    ExtractedText {
        engine: "unknown",
        text: String::new(),
        warnings,
    }
}
