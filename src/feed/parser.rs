use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

/// Errors that make a response body unusable as a feed.
#[derive(Debug, Error)]
pub enum MalformedFeed {
    /// The document root has no `<channel>` child.
    #[error("Malformed feed: no <channel> under the document root")]
    MissingChannel,

    /// The body is not well-formed XML.
    #[error("Malformed feed: {0}")]
    Xml(String),
}

/// A parsed RSS document: channel metadata plus the usable items in
/// document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<RssItem>,
}

/// An item carrying all four fields ingestion needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Publication date exactly as written in the feed
    pub pub_date: String,
}

#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    pub_date: Option<String>,
}

impl RawItem {
    /// Items missing any field are not usable.
    fn into_item(self) -> Option<RssItem> {
        Some(RssItem {
            title: self.title?,
            link: self.link?,
            description: self.description?,
            pub_date: self.pub_date?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Field {
    ChannelTitle,
    ChannelLink,
    ChannelDescription,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPubDate,
}

/// Tracks where the reader is inside `<root><channel><item>...`.
#[derive(Default)]
struct ParseState {
    depth: usize,
    seen_channel: bool,
    in_channel: bool,
    item: Option<RawItem>,
    /// Field being captured and the depth of its element
    capture: Option<(Field, usize)>,
    text: String,
    feed: RssFeed,
    dropped: usize,
}

impl ParseState {
    fn start(&mut self, e: &BytesStart<'_>) {
        self.depth += 1;
        if self.capture.is_some() {
            // Markup nested in a field contributes only its text
            return;
        }

        let name = e.name();
        match (self.depth, name.as_ref()) {
            (2, b"channel") if !self.seen_channel => {
                self.seen_channel = true;
                self.in_channel = true;
            }
            (3, b"item") if self.in_channel => self.item = Some(RawItem::default()),
            (3, tag) if self.in_channel => self.begin_capture(channel_field(tag)),
            (4, tag) if self.item.is_some() => self.begin_capture(item_field(tag)),
            _ => {}
        }
    }

    fn empty(&mut self, e: &BytesStart<'_>) {
        if self.capture.is_some() {
            return;
        }
        match (self.depth + 1, e.name().as_ref()) {
            (2, b"channel") if !self.seen_channel => self.seen_channel = true,
            (3, b"item") if self.in_channel => self.dropped += 1,
            _ => {}
        }
    }

    fn end(&mut self) {
        if let Some((field, depth)) = self.capture {
            if depth == self.depth {
                self.finish_capture(field);
            }
        } else if self.depth == 3 && self.item.is_some() {
            if let Some(raw) = self.item.take() {
                match raw.into_item() {
                    Some(item) => self.feed.items.push(item),
                    None => self.dropped += 1,
                }
            }
        } else if self.depth == 2 && self.in_channel {
            self.in_channel = false;
        }
        self.depth = self.depth.saturating_sub(1);
    }

    fn text(&mut self, text: &str) {
        if self.capture.is_some() {
            self.text.push_str(text);
        }
    }

    fn begin_capture(&mut self, field: Option<Field>) {
        if let Some(field) = field {
            self.capture = Some((field, self.depth));
            self.text.clear();
        }
    }

    fn finish_capture(&mut self, field: Field) {
        self.capture = None;
        let value = self.text.trim();
        if value.is_empty() {
            return;
        }
        let value = value.to_string();

        match field {
            Field::ChannelTitle => self.feed.title = value,
            Field::ChannelLink => self.feed.link = value,
            Field::ChannelDescription => self.feed.description = value,
            Field::ItemTitle | Field::ItemLink | Field::ItemDescription | Field::ItemPubDate => {
                if let Some(item) = self.item.as_mut() {
                    let slot = match field {
                        Field::ItemTitle => &mut item.title,
                        Field::ItemLink => &mut item.link,
                        Field::ItemDescription => &mut item.description,
                        _ => &mut item.pub_date,
                    };
                    // First occurrence wins
                    slot.get_or_insert(value);
                }
            }
        }
    }
}

fn channel_field(tag: &[u8]) -> Option<Field> {
    match tag {
        b"title" => Some(Field::ChannelTitle),
        b"link" => Some(Field::ChannelLink),
        b"description" => Some(Field::ChannelDescription),
        _ => None,
    }
}

fn item_field(tag: &[u8]) -> Option<Field> {
    match tag {
        b"title" => Some(Field::ItemTitle),
        b"link" => Some(Field::ItemLink),
        b"description" => Some(Field::ItemDescription),
        b"pubDate" => Some(Field::ItemPubDate),
        _ => None,
    }
}

/// Parses an RSS document rooted at any element whose `<channel>` child
/// holds `title`, `link`, `description` and zero or more `<item>`s.
///
/// Items lacking a non-empty `title`, `link`, `description` or `pubDate`
/// are dropped. Names are matched exactly, so prefixed elements such as
/// `<atom:link>` never stand in for their RSS counterparts.
///
/// The body is taken as raw bytes. Text is decoded with the encoding named
/// in the XML declaration (e.g. `ISO-8859-1`), or a byte order mark, and
/// defaults to UTF-8.
///
/// # Errors
///
/// - [`MalformedFeed::Xml`] if the body is not well-formed XML
/// - [`MalformedFeed::MissingChannel`] if the root has no `<channel>` child
pub fn parse_feed<B>(body: &B) -> Result<RssFeed, MalformedFeed>
where
    B: AsRef<[u8]> + ?Sized,
{
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations. Unknown
    // entities fail `unescape()` and the raw text is kept instead.
    let mut reader = Reader::from_reader(body.as_ref());

    let mut state = ParseState::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => state.start(&e),
            Ok(Event::Empty(e)) => state.empty(&e),
            Ok(Event::End(_)) => state.end(),
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(text) => state.text(&text),
                Err(err) => {
                    tracing::debug!(error = %err, "Keeping unescapable feed text verbatim");
                    state.text(&String::from_utf8_lossy(&e));
                }
            },
            Ok(Event::CData(e)) => match e.decode() {
                Ok(text) => state.text(&text),
                Err(err) => {
                    tracing::debug!(error = %err, "Keeping undecodable CDATA verbatim");
                    state.text(&String::from_utf8_lossy(&e));
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MalformedFeed::Xml(e.to_string())),
            _ => {}
        }
    }

    if !state.seen_channel {
        return Err(MalformedFeed::MissingChannel);
    }

    if state.dropped > 0 {
        tracing::debug!(
            kept = state.feed.items.len(),
            dropped = state.dropped,
            "Dropped feed items with missing fields"
        );
    }

    Ok(state.feed)
}
