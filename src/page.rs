//! Public landing page of a short link
//!
//! The page carries the target's title and meta tags so link previews show
//! the target's content, then sends the browser on to the full link.

use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::model::{MetaTag, ResolvedShortLink};

/// Seconds the page waits before leaving
pub const REDIRECT_WAIT: u32 = 0;

/// Value of the `Refresh` header and the `<noscript>` meta refresh
pub fn refresh_value(full_link: &str) -> String {
    format!("{REDIRECT_WAIT}; url={full_link}")
}

pub fn render_landing(resolved: &ResolvedShortLink) -> Markup {
    let full_link = resolved.short_link.full_link.as_str();

    html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                link rel="canonical" href=(full_link);

                @for meta in &resolved.meta_list {
                    @match &meta.tag {
                        MetaTag::Title { raw_text } => {
                            @if !raw_text.is_empty() {
                                title { (raw_text) }
                            }
                        }
                        MetaTag::Meta { content, property, name } => {
                            @if !content.is_empty() {
                                @match (property, name) {
                                    (Some(property), _) => {
                                        meta property=(property) content=(content);
                                    }
                                    (None, Some(name)) => {
                                        meta name=(name) content=(content);
                                    }
                                    (None, None) => {}
                                }
                            }
                        }
                    }
                }

                noscript {
                    meta http-equiv="refresh" content=(refresh_value(full_link));
                }
            }
            body {
                p {
                    "Redirecting to "
                    a href=(full_link) { (full_link) }
                }
                script { (PreEscaped(redirect_script(full_link))) }
            }
        }
    }
}

fn redirect_script(full_link: &str) -> String {
    // JSON string literals are valid JS; "</" must not close the script element
    let target = serde_json::Value::from(full_link)
        .to_string()
        .replace("</", "<\\/");
    format!(
        "setTimeout(function () {{ window.location.replace({target}); }}, {} * 1000);",
        REDIRECT_WAIT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ShortLink, ShortLinkMeta};
    use chrono::Utc;

    fn resolved(full_link: &str, tags: Vec<MetaTag>) -> ResolvedShortLink {
        let now = Utc::now();
        ResolvedShortLink {
            short_link: ShortLink {
                id: "l1".to_string(),
                slug: "abcd".to_string(),
                full_link: full_link.to_string(),
                user_id: "u1".to_string(),
                created_at: now,
                updated_at: now,
            },
            meta_list: tags
                .into_iter()
                .enumerate()
                .map(|(i, tag)| ShortLinkMeta {
                    id: format!("m{i}"),
                    short_link_id: "l1".to_string(),
                    tag,
                    created_at: now,
                })
                .collect(),
        }
    }

    #[test]
    fn test_landing_carries_metas_and_refresh() {
        let page = render_landing(&resolved(
            "https://example.com/a?b=1&c=2",
            vec![
                MetaTag::Title {
                    raw_text: "Example & Co".to_string(),
                },
                MetaTag::Meta {
                    content: "An example".to_string(),
                    property: Some("og:description".to_string()),
                    name: None,
                },
                MetaTag::Meta {
                    content: "summary".to_string(),
                    property: None,
                    name: Some("twitter:card".to_string()),
                },
            ],
        ))
        .into_string();

        assert!(page.starts_with("<!DOCTYPE html>"));
        let canonical = r#"<link rel="canonical" href="https://example.com/a?b=1&amp;c=2">"#;
        assert!(page.contains(canonical));
        assert!(page.contains("<title>Example &amp; Co</title>"));
        assert!(page.contains(r#"<meta property="og:description" content="An example">"#));
        assert!(page.contains(r#"<meta name="twitter:card" content="summary">"#));
        let refresh = r#"http-equiv="refresh" content="0; url=https://example.com/a?b=1&amp;c=2""#;
        assert!(page.contains(refresh));
    }

    #[test]
    fn test_script_cannot_break_out() {
        let page =
            render_landing(&resolved("https://example.com/</script><b>", vec![])).into_string();
        assert!(!page.contains("</script><b>"));
        assert!(page.contains(r#"window.location.replace("https://example.com/<\/script><b>")"#));
    }
}
