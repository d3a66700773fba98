//! RSS and Atom parsing into [`Entry`] values
//!
//! RSS 2.0 is tried first, then Atom. Entries keep document order.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::FeedError;
use crate::feed::{Entry, MediaRef};

/// Parse decoded feed text into entries, in feed order
pub fn parse_entries(text: &str) -> Result<Vec<Entry>, FeedError> {
    let rss_error = match rss::Channel::from_str(text) {
        Ok(channel) => return Ok(channel.items().iter().map(entry_from_rss).collect()),
        Err(e) => e,
    };

    match atom_syndication::Feed::from_str(text) {
        Ok(feed) => Ok(feed.entries().iter().map(entry_from_atom).collect()),
        Err(atom_error) => Err(FeedError::Parse(format!(
            "not RSS ({}) and not Atom ({})",
            rss_error, atom_error
        ))),
    }
}

fn entry_from_rss(item: &rss::Item) -> Entry {
    let media = collect_media(item.extensions());

    let enclosures = item
        .enclosure()
        .filter(|enclosure| !enclosure.url().trim().is_empty())
        .map(|enclosure| MediaRef {
            url: enclosure.url().trim().to_string(),
            mime_type: non_empty(enclosure.mime_type()),
            medium: None,
        })
        .into_iter()
        .collect();

    Entry {
        id: item.guid().and_then(|guid| non_empty(guid.value())),
        title: item.title().and_then(non_empty),
        link: item.link().and_then(non_empty),
        media_content: media.content,
        media_thumbnails: media.thumbnails,
        enclosures,
    }
}

fn entry_from_atom(entry: &atom_syndication::Entry) -> Entry {
    let media = collect_media(entry.extensions());

    let link = entry
        .links()
        .iter()
        .find(|link| link.rel() == "alternate")
        .or_else(|| entry.links().first())
        .and_then(|link| non_empty(link.href()));

    let enclosures = entry
        .links()
        .iter()
        .filter(|link| link.rel() == "enclosure" && !link.href().trim().is_empty())
        .map(|link| MediaRef {
            url: link.href().trim().to_string(),
            mime_type: link.mime_type().and_then(non_empty),
            medium: None,
        })
        .collect();

    Entry {
        id: non_empty(entry.id()),
        title: non_empty(&entry.title().value),
        link,
        media_content: media.content,
        media_thumbnails: media.thumbnails,
        enclosures,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Shared view over the `rss` and `atom_syndication` extension types
trait MediaExtension: Sized {
    fn attr(&self, name: &str) -> Option<&str>;
    fn child_list(&self, name: &str) -> &[Self];
}

impl MediaExtension for rss::extension::Extension {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs().get(name).map(String::as_str)
    }

    fn child_list(&self, name: &str) -> &[Self] {
        child_list(self.children(), name)
    }
}

impl MediaExtension for atom_syndication::extension::Extension {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs().get(name).map(String::as_str)
    }

    fn child_list(&self, name: &str) -> &[Self] {
        child_list(self.children(), name)
    }
}

/// Children are keyed by local name, though some writers keep the prefix
fn child_list<'a, E>(children: &'a BTreeMap<String, Vec<E>>, name: &str) -> &'a [E] {
    children
        .get(name)
        .or_else(|| children.get(&format!("media:{}", name)))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[derive(Default)]
struct MediaLists {
    content: Vec<MediaRef>,
    thumbnails: Vec<MediaRef>,
}

/// Gather `media:content` and `media:thumbnail`, including those nested in
/// `media:group`, in document order
fn collect_media<E: MediaExtension>(
    extensions: &BTreeMap<String, BTreeMap<String, Vec<E>>>,
) -> MediaLists {
    let mut lists = MediaLists::default();
    let Some(media) = extensions.get("media") else {
        return lists;
    };

    let push = |lists: &mut MediaLists, kind: &str, ext: &E| {
        let Some(url) = ext.attr("url").and_then(non_empty) else {
            return;
        };
        let media_ref = MediaRef {
            url,
            mime_type: ext.attr("type").and_then(non_empty),
            medium: ext.attr("medium").and_then(non_empty),
        };
        match kind {
            "content" => lists.content.push(media_ref),
            _ => lists.thumbnails.push(media_ref),
        }
    };

    for kind in ["content", "thumbnail"] {
        for ext in media.get(kind).map(Vec::as_slice).unwrap_or(&[]) {
            push(&mut lists, kind, ext);
        }
        for group in media.get("group").map(Vec::as_slice).unwrap_or(&[]) {
            for ext in group.child_list(kind) {
                push(&mut lists, kind, ext);
            }
        }
    }

    lists
}
