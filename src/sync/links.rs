//! Outbound link extraction and replacement.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::SyncError;
use crate::models::{LinkKind, LinkRecord, PageId};
use crate::repository::{LinkRepository, RevisionRepository};

/// `[[Target|label]]`; the capture stops at a pipe, anchor, or bracket.
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[\s*([^\[\]\|#\n]+)").unwrap());

/// `{{Name|args}}`, skipping `{{{parameters}}}`.
static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^{])\{\{\s*([^{}\|#\n]+)").unwrap());

/// Namespaces a template call may name explicitly.
const NAMESPACES: &[&str] = &[
    "Category", "File", "Help", "Image", "Media", "MediaWiki", "Module", "Portal", "Project",
    "Talk", "Template", "User", "Wikipedia",
];

/// Magic words and parser functions that look like template calls.
const MAGIC_WORDS: &[&str] = &[
    "!", "=", "anchorencode", "defaultsort", "displaytitle", "filepath", "formatnum",
    "fullpagename", "fullurl", "gender", "grammar", "int", "lc", "lcfirst", "localurl",
    "namespace", "ns", "padleft", "padright", "pagename", "plural", "sitename", "tag", "uc",
    "ucfirst", "urlencode",
];

/// Canonical title form: underscores as spaces, single spaces, first
/// letter of the namespace and of the name uppercased.
pub fn normalize_title(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some((ns, rest)) = collapsed.split_once(':') {
        if let Some(ns) = known_namespace(ns) {
            return format!("{}:{}", ns, upper_first(rest.trim()));
        }
    }
    upper_first(&collapsed)
}

fn known_namespace(prefix: &str) -> Option<&'static str> {
    let prefix = prefix.trim();
    NAMESPACES
        .iter()
        .find(|ns| ns.eq_ignore_ascii_case(prefix))
        .copied()
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn classify_wikilink(target: &str) -> Option<(String, LinkKind)> {
    let target = target.trim();
    if let Some(escaped) = target.strip_prefix(':') {
        let title = normalize_title(escaped);
        return (!title.is_empty()).then_some((title, LinkKind::Reference));
    }

    let title = normalize_title(target);
    if title.is_empty() {
        return None;
    }
    let kind = match title.split_once(':').map(|(ns, _)| ns) {
        Some("Category") => LinkKind::CategoryMembership,
        Some("File") | Some("Image") | Some("Media") => LinkKind::MediaReference,
        _ => LinkKind::Reference,
    };
    let title = match kind {
        LinkKind::MediaReference => title
            .split_once(':')
            .map(|(_, name)| format!("File:{}", name))
            .unwrap_or(title),
        _ => title,
    };
    Some((title, kind))
}

fn classify_template(name: &str) -> Option<String> {
    let mut name = name.trim();
    for prefix in ["subst:", "safesubst:"] {
        if name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            name = name[prefix.len()..].trim_start();
        }
    }
    if name.is_empty() {
        return None;
    }
    if let Some(main) = name.strip_prefix(':') {
        let title = normalize_title(main);
        return (!title.is_empty()).then_some(title);
    }

    let head = name.split(':').next().unwrap_or(name).trim();
    let is_magic = MAGIC_WORDS.iter().any(|m| m.eq_ignore_ascii_case(head))
        || (head.chars().any(|c| c.is_alphabetic())
            && head.chars().all(|c| !c.is_lowercase())
            && name.contains(':'));
    if is_magic {
        return None;
    }

    match name.split_once(':') {
        Some((ns, _)) if known_namespace(ns).is_some() => Some(normalize_title(name)),
        _ => Some(format!("Template:{}", normalize_title(name))),
    }
}

/// Extract the outbound link set of one page body, sorted and deduplicated.
pub fn extract_links(page_id: PageId, wikitext: &str) -> Vec<LinkRecord> {
    let mut found = BTreeSet::new();

    for caps in WIKILINK.captures_iter(wikitext) {
        if let Some((title, kind)) = classify_wikilink(&caps[1]) {
            found.insert(LinkRecord::new(page_id, title, kind));
        }
    }
    for caps in TEMPLATE.captures_iter(wikitext) {
        if let Some(title) = classify_template(&caps[1]) {
            found.insert(LinkRecord::new(page_id, title, LinkKind::Transclusion));
        }
    }

    found.into_iter().collect()
}

/// Rebuilds a page's link set from its newest mirrored body.
pub struct LinkDeltaApplier {
    revisions: RevisionRepository,
    links: LinkRepository,
}

impl LinkDeltaApplier {
    pub fn new(revisions: RevisionRepository, links: LinkRepository) -> Self {
        Self { revisions, links }
    }

    /// Replace the page's links atomically.
    ///
    /// Returns `None` and leaves the existing set alone when the newest
    /// revision has no visible body.
    pub async fn apply(&self, page_id: PageId) -> Result<Option<usize>, SyncError> {
        let Some(content) = self.revisions.latest_content(page_id).await? else {
            debug!("Page {} has no visible content; links left as-is", page_id);
            return Ok(None);
        };
        let links = extract_links(page_id, &content);
        let inserted = self.links.replace_for_source(page_id, &links).await?;
        debug!("Page {}: {} links", page_id, inserted);
        Ok(Some(inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Page;
    use crate::repository::test_support::{revision, setup_test_db};

    fn kinds(links: &[LinkRecord]) -> Vec<(&str, LinkKind)> {
        links
            .iter()
            .map(|l| (l.target_title.as_str(), l.kind))
            .collect()
    }

    #[test]
    fn test_extract_link_kinds() {
        let text = "See [[main_page|home]] and [[Other page#History]].\n\
            [[File:Icon.png|thumb|An [[icon]]]] [[image:old logo.svg]] [[Media:Clip.ogg]]\n\
            {{Infobox city|name=X}} {{ {{{param}}} }} {{subst:Welcome}} {{:Main Page}}\n\
            {{DEFAULTSORT:Foo}} {{PAGENAME}} {{#if:x|y}} {{lc:ABC}}\n\
            [[Category:Cities|Foo]] [[:Category:Lists]]";

        let links = extract_links(3, text);
        let mut got = kinds(&links);
        got.sort();
        let mut expected = vec![
            ("Main page", LinkKind::Reference),
            ("Other page", LinkKind::Reference),
            ("Icon", LinkKind::Reference),
            ("File:Icon.png", LinkKind::MediaReference),
            ("File:Old logo.svg", LinkKind::MediaReference),
            ("File:Clip.ogg", LinkKind::MediaReference),
            ("Template:Infobox city", LinkKind::Transclusion),
            ("Template:Welcome", LinkKind::Transclusion),
            ("Main Page", LinkKind::Transclusion),
            ("Category:Cities", LinkKind::CategoryMembership),
            ("Category:Lists", LinkKind::Reference),
        ];
        expected.sort();
        assert_eq!(got, expected);
        assert!(links.iter().all(|l| l.source_page_id == 3));
    }

    #[test]
    fn test_duplicates_collapse() {
        let links = extract_links(1, "[[A]] [[a]] [[A|again]] {{T}} {{t}}");
        assert_eq!(
            kinds(&links),
            vec![("A", LinkKind::Reference), ("Template:T", LinkKind::Transclusion)]
        );
    }

    #[tokio::test]
    async fn test_apply_replaces_set() {
        let (ctx, _dir) = setup_test_db().await;
        let page = Page::new(8, 0, "Eight");
        let mut first = revision(8, 1, None);
        first.content = Some("[[Old]]".to_string());
        let mut second = revision(8, 2, Some(1));
        second.content = Some("[[New]] [[Category:Things]]".to_string());

        ctx.revisions().insert_for_page(8, Some(&page), &[first]).await.unwrap();
        let applier = LinkDeltaApplier::new(ctx.revisions(), ctx.links());
        assert_eq!(applier.apply(8).await.unwrap(), Some(1));

        ctx.revisions().insert_for_page(8, None, &[second]).await.unwrap();
        assert_eq!(applier.apply(8).await.unwrap(), Some(2));

        let stored = ctx.links().for_source(8).await.unwrap();
        let titles: Vec<_> = stored.iter().map(|l| l.target_title.as_str()).collect();
        assert!(titles.contains(&"New"));
        assert!(titles.contains(&"Category:Things"));
        assert!(!titles.contains(&"Old"));
    }

    #[tokio::test]
    async fn test_hidden_content_keeps_links() {
        let (ctx, _dir) = setup_test_db().await;
        let page = Page::new(2, 0, "Two");
        let mut rev = revision(2, 1, None);
        rev.content = Some("[[Kept]]".to_string());
        ctx.revisions().insert_for_page(2, Some(&page), &[rev]).await.unwrap();

        let applier = LinkDeltaApplier::new(ctx.revisions(), ctx.links());
        applier.apply(2).await.unwrap();

        let mut hidden = revision(2, 2, Some(1));
        hidden.content = None;
        ctx.revisions().insert_for_page(2, None, &[hidden]).await.unwrap();

        assert_eq!(applier.apply(2).await.unwrap(), None);
        assert_eq!(ctx.links().count().await.unwrap(), 1);
    }
}
