//! Heading-tagged HTML rendering, used only to feed the external classifier

use once_cell::sync::Lazy;
use regex::Regex;

use super::structure::{known_title, Block};

static TOP_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(STANDARD|PART|CHAPTER)\s+(\d+|[IVX]+)\b").expect("Invalid regex")
});
static STANDARD_LEVEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Standard\s+\d+").expect("Invalid regex"));
static LETTERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-H][.)]\s").expect("Invalid regex"));
static ROMAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[IVX]+\.\s").expect("Invalid regex"));
static HEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<h([1-4])>(.*?)</h[1-4]>").expect("Invalid regex"));

/// Heading level 1-4 by a fixed rule ladder; the first rule that fires wins
pub fn heading_level(text: &str) -> u8 {
    let text = text.trim();
    if TOP_LEVEL.is_match(text) {
        1
    } else if STANDARD_LEVEL.is_match(text) {
        2
    } else if LETTERED.is_match(text) {
        3
    } else if ROMAN.is_match(text) {
        4
    } else if known_title(text) {
        2
    } else {
        3
    }
}

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Render blocks as HTML, one element per line
pub fn render(blocks: &[Block]) -> String {
    let mut html = String::new();
    let mut in_list = false;

    for block in blocks {
        if in_list && !matches!(block, Block::ListItem { .. }) {
            html.push_str("</ul>\n");
            in_list = false;
        }
        match block {
            Block::Heading { text, .. } => {
                let level = heading_level(text);
                html.push_str(&format!("<h{level}>{}</h{level}>\n", escape(text)));
            }
            Block::Paragraph { text, .. } => {
                html.push_str(&format!("<p>{}</p>\n", escape(text)));
            }
            Block::ListItem { text, .. } => {
                if !in_list {
                    html.push_str("<ul>\n");
                    in_list = true;
                }
                html.push_str(&format!("<li>{}</li>\n", escape(text)));
            }
            Block::Table { rows, .. } => {
                html.push_str("<table>\n");
                for (i, row) in rows.iter().enumerate() {
                    let tag = if i == 0 { "th" } else { "td" };
                    html.push_str("<tr>");
                    for cell in row {
                        html.push_str(&format!("<{tag}>{}</{tag}>", escape(cell)));
                    }
                    html.push_str("</tr>\n");
                }
                html.push_str("</table>\n");
            }
        }
    }
    if in_list {
        html.push_str("</ul>\n");
    }
    html
}

/// One unit of outbound classification work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlChunk {
    /// Plain-text heading; empty for a preamble or a heading-less document
    pub heading: String,
    pub html: String,
}

/// Split rendered HTML at the smallest heading level present.
///
/// Content before the first such heading is its own chunk. A document with no
/// headings is a single chunk.
pub fn split_chunks(html: &str) -> Vec<HtmlChunk> {
    let headings: Vec<(usize, u8, String)> = HEADING_TAG
        .captures_iter(html)
        .filter_map(|caps| {
            let start = caps.get(0)?.start();
            let level = caps[1].parse::<u8>().ok()?;
            Some((start, level, unescape(&caps[2])))
        })
        .collect();

    let Some(top) = headings.iter().map(|(_, level, _)| *level).min() else {
        return if html.trim().is_empty() {
            Vec::new()
        } else {
            vec![HtmlChunk {
                heading: String::new(),
                html: html.to_string(),
            }]
        };
    };

    let splits: Vec<&(usize, u8, String)> = headings.iter().filter(|(_, l, _)| *l == top).collect();
    let mut chunks = Vec::with_capacity(splits.len() + 1);

    let preamble = &html[..splits[0].0];
    if !preamble.trim().is_empty() {
        chunks.push(HtmlChunk {
            heading: String::new(),
            html: preamble.to_string(),
        });
    }

    for (i, (start, _, heading)) in splits.iter().enumerate() {
        let end = splits.get(i + 1).map(|s| s.0).unwrap_or(html.len());
        chunks.push(HtmlChunk {
            heading: heading.clone(),
            html: html[*start..end].to_string(),
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::structure::blocks;

    #[test]
    fn test_heading_ladder() {
        assert_eq!(heading_level("STANDARD 2 GOVERNANCE"), 1);
        assert_eq!(heading_level("CHAPTER IV"), 1);
        assert_eq!(heading_level("Standard 2: Governance"), 2);
        assert_eq!(heading_level("B. Bylaws"), 3);
        assert_eq!(heading_level("IV. Budget"), 4);
        assert_eq!(heading_level("Executive Summary"), 2);
        assert_eq!(heading_level("3.1 Faculty Load"), 3);
    }

    #[test]
    fn test_render_escapes() {
        let html = render(&blocks("OVERVIEW\nR&D <budget> \"grew\".\n- one\n- two"));
        assert!(html.contains("<h2>OVERVIEW</h2>"));
        assert!(html.contains("<p>R&amp;D &lt;budget&gt; &quot;grew&quot;.</p>"));
        assert!(html.contains("<ul>\n<li>- one</li>\n<li>- two</li>\n</ul>"));
    }

    #[test]
    fn test_render_table() {
        let html = render(&blocks("Week\tTopic\n1\tIntro"));
        assert!(html.contains("<tr><th>Week</th><th>Topic</th></tr>"));
        assert!(html.contains("<tr><td>1</td><td>Intro</td></tr>"));
    }

    #[test]
    fn test_split_at_top_level_with_preamble() {
        let html = render(&blocks(
            "Prepared for review.\nSTANDARD 1 MISSION\nText one.\nB. Detail\nMore.\nSTANDARD 2 GOVERNANCE\nText two.",
        ));
        let chunks = split_chunks(&html);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, "");
        assert!(chunks[0].html.contains("Prepared for review."));
        assert_eq!(chunks[1].heading, "STANDARD 1 MISSION");
        assert!(chunks[1].html.contains("<h3>B. Detail</h3>"));
        assert_eq!(chunks[2].heading, "STANDARD 2 GOVERNANCE");
    }

    #[test]
    fn test_no_headings_is_one_chunk() {
        let html = render(&blocks("just a paragraph."));
        let chunks = split_chunks(&html);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "");
        assert!(split_chunks("").is_empty());
    }
}
