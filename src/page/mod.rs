//! Page model: every persisted unit of the store and its tagged encoding.
//!
//! A page is serialized as a big-endian `i32` kind tag followed by the
//! kind-specific body. [`PageCodec`] owns the tag to decoder registry used
//! when pages come back from a backend.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::primitives::bytes::{PageSink, PageSource};
use crate::types::{Result, TesseraError};

mod indirect;
mod key;
mod name;
mod node;
mod reference;
mod revision_root;
mod uber;

pub use indirect::IndirectPage;
pub use key::{deserialize_key, serialize_key, PageKey, EMBEDDED_KIND, FILE_KIND, NULL_KIND, OBJECT_KIND};
pub use name::{MetaPage, NamePage};
pub use node::{NodePage, Record, SlotEntry, VersionLinks};
pub use reference::{PageReference, PageSlot};
pub use revision_root::{
    RevisionRootPage, META_REFERENCE_OFFSET, NAME_REFERENCE_OFFSET, NODE_TRIE_REFERENCE_OFFSET,
};
pub use uber::UberPage;

/// Kind tag written ahead of every page body.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PageKind {
    /// [`UberPage`].
    Uber = 1,
    /// [`IndirectPage`].
    Indirect = 2,
    /// [`RevisionRootPage`].
    RevisionRoot = 3,
    /// [`NodePage`].
    Node = 4,
    /// [`NamePage`].
    Name = 5,
    /// [`MetaPage`].
    Meta = 6,
}

impl PageKind {
    /// Persisted tag value.
    pub fn tag(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageKind::Uber => "uber",
            PageKind::Indirect => "indirect",
            PageKind::RevisionRoot => "revision-root",
            PageKind::Node => "node",
            PageKind::Name => "name",
            PageKind::Meta => "meta",
        };
        f.write_str(name)
    }
}

/// Store-wide shape parameters needed to decode pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageLayout {
    /// References per indirect page.
    pub fanout: usize,
    /// Slots per node page.
    pub bucket_capacity: usize,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            fanout: 128,
            bucket_capacity: 128,
        }
    }
}

/// Any persisted page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Page {
    /// Root of a committed state.
    Uber(UberPage),
    /// Radix trie level.
    Indirect(IndirectPage),
    /// Per-revision root.
    RevisionRoot(RevisionRootPage),
    /// Bucket version.
    Node(NodePage),
    /// Name dictionary.
    Name(NamePage),
    /// Revision metadata.
    Meta(MetaPage),
}

impl Page {
    /// Kind tag of this page.
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::Indirect(_) => PageKind::Indirect,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Node(_) => PageKind::Node,
            Page::Name(_) => PageKind::Name,
            Page::Meta(_) => PageKind::Meta,
        }
    }

    /// Number of outgoing references.
    pub fn reference_count(&self) -> usize {
        match self {
            Page::Uber(_) => 1,
            Page::Indirect(page) => page.references().len(),
            Page::RevisionRoot(page) => page.references().len(),
            Page::Node(_) | Page::Name(_) | Page::Meta(_) => 0,
        }
    }

    /// Outgoing reference at `index`.
    pub fn reference(&self, index: usize) -> Option<&PageReference> {
        match self {
            Page::Uber(page) if index == 0 => Some(page.revision_trie()),
            Page::Indirect(page) => page.reference(index),
            Page::RevisionRoot(page) => page.reference(index),
            _ => None,
        }
    }

    pub(crate) fn reference_mut(&mut self, index: usize) -> Option<&mut PageReference> {
        match self {
            Page::Uber(page) if index == 0 => Some(page.revision_trie_mut()),
            Page::Indirect(page) => page.references_mut().get_mut(index),
            Page::RevisionRoot(page) => page.references_mut().get_mut(index),
            _ => None,
        }
    }

    /// Serializes the kind tag and body.
    pub fn serialize(&self, sink: &mut PageSink) -> Result<()> {
        sink.put_i32(self.kind().tag());
        match self {
            Page::Uber(page) => page.serialize_body(sink),
            Page::Indirect(page) => page.serialize_body(sink),
            Page::RevisionRoot(page) => page.serialize_body(sink),
            Page::Node(page) => return page.serialize_body(sink),
            Page::Name(page) => return page.serialize_body(sink),
            Page::Meta(page) => return page.serialize_body(sink),
        }
        Ok(())
    }

    /// Convenience wrapper around [`Page::serialize`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut sink = PageSink::new();
        self.serialize(&mut sink)?;
        Ok(sink.into_vec())
    }
}

type Decoder = fn(&PageLayout, &mut PageSource<'_>) -> Result<Page>;

/// Registry mapping kind tags to page decoders.
#[derive(Clone)]
pub struct PageCodec {
    layout: PageLayout,
    decoders: FxHashMap<i32, Decoder>,
}

impl fmt::Debug for PageCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("PageCodec")
            .field("layout", &self.layout)
            .field("tags", &tags)
            .finish()
    }
}

impl PageCodec {
    /// Codec with every built-in page kind registered.
    pub fn new(layout: PageLayout) -> Self {
        let mut codec = Self {
            layout,
            decoders: FxHashMap::default(),
        };
        codec.register(PageKind::Uber.tag(), |_, src| {
            UberPage::deserialize_body(src).map(Page::Uber)
        });
        codec.register(PageKind::Indirect.tag(), |layout, src| {
            IndirectPage::deserialize_body(layout, src).map(Page::Indirect)
        });
        codec.register(PageKind::RevisionRoot.tag(), |_, src| {
            RevisionRootPage::deserialize_body(src).map(Page::RevisionRoot)
        });
        codec.register(PageKind::Node.tag(), |layout, src| {
            NodePage::deserialize_body(layout, src).map(Page::Node)
        });
        codec.register(PageKind::Name.tag(), |_, src| {
            NamePage::deserialize_body(src).map(Page::Name)
        });
        codec.register(PageKind::Meta.tag(), |_, src| {
            MetaPage::deserialize_body(src).map(Page::Meta)
        });
        codec
    }

    /// Layout the codec decodes with.
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Registers (or replaces) the decoder for `tag`.
    pub fn register(&mut self, tag: i32, decoder: Decoder) {
        self.decoders.insert(tag, decoder);
    }

    /// Encodes `page` into a fresh buffer.
    pub fn encode(&self, page: &Page) -> Result<Vec<u8>> {
        page.to_bytes()
    }

    /// Decodes a page, rejecting unknown tags and trailing bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Page> {
        let mut source = PageSource::new(bytes);
        let tag = source.get_i32()?;
        let decoder = self
            .decoders
            .get(&tag)
            .ok_or(TesseraError::UnknownPageKind(tag))?;
        let page = decoder(&self.layout, &mut source)?;
        source.finish()?;
        Ok(page)
    }
}

impl Default for PageCodec {
    fn default() -> Self {
        Self::new(PageLayout::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BucketNo, RecordKey, Revision};

    fn small_layout() -> PageLayout {
        PageLayout {
            fanout: 4,
            bucket_capacity: 8,
        }
    }

    #[test]
    fn every_page_kind_decodes_to_an_equal_page() {
        let layout = small_layout();
        let codec = PageCodec::new(layout);

        let mut uber = UberPage::bootstrap();
        uber.bump_revision_count();
        *uber.revision_trie_mut() = PageReference::from_key(PageKey::File {
            offset: 0,
            length: 40,
        });

        let mut indirect = IndirectPage::new(layout.fanout);
        indirect.references_mut()[3] = PageReference::from_key(PageKey::Object { id: 2 });

        let mut root = RevisionRootPage::new(Revision(2));
        root.allocate_record_key();
        root.increment_size();
        root.stamp();

        let mut node = NodePage::new(BucketNo(5), layout.bucket_capacity);
        node.set_links(VersionLinks {
            previous: Some(PageKey::Embedded { id: 1 }),
            full_dump: Some(PageKey::Embedded { id: 0 }),
            window: 2,
        });
        node.set_entry(1, Some(SlotEntry::Record(Record::new(41, b"payload".to_vec()))));
        node.set_entry(7, Some(SlotEntry::Tombstone(RecordKey(47))));

        let mut names = NamePage::default();
        names.intern(12, "person");
        let mut meta = MetaPage::default();
        meta.set("author", "ada");

        for page in [
            Page::Uber(uber),
            Page::Indirect(indirect),
            Page::RevisionRoot(root),
            Page::Node(node),
            Page::Name(names),
            Page::Meta(meta),
        ] {
            let bytes = codec.encode(&page).unwrap();
            assert_eq!(&bytes[..4], &page.kind().tag().to_be_bytes());
            assert_eq!(codec.decode(&bytes).unwrap(), page);
        }
    }

    #[test]
    fn unregistered_tag_is_unknown_page_kind() {
        let codec = PageCodec::default();
        let bytes = 99i32.to_be_bytes();
        assert!(matches!(
            codec.decode(&bytes),
            Err(TesseraError::UnknownPageKind(99))
        ));
    }

    #[test]
    fn trailing_bytes_are_corruption() {
        let codec = PageCodec::default();
        let mut bytes = Page::Meta(MetaPage::default()).to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(codec.decode(&bytes), Err(TesseraError::Corruption(_))));
    }

    #[test]
    fn fanout_mismatch_is_incompatible() {
        let bytes = Page::Indirect(IndirectPage::new(4)).to_bytes().unwrap();
        let codec = PageCodec::new(PageLayout {
            fanout: 8,
            bucket_capacity: 8,
        });
        assert!(matches!(codec.decode(&bytes), Err(TesseraError::Incompatible(_))));
    }

    #[test]
    fn capability_accessors_follow_page_kind() {
        let mut page = Page::Indirect(IndirectPage::new(4));
        assert_eq!(page.reference_count(), 4);
        *page.reference_mut(2).unwrap() = PageReference::from_key(PageKey::Embedded { id: 3 });
        assert_eq!(
            page.reference(2).and_then(PageReference::key),
            Some(&PageKey::Embedded { id: 3 })
        );
        assert!(page.reference(4).is_none());
        assert_eq!(Page::Node(NodePage::new(BucketNo(0), 2)).reference_count(), 0);
        assert_eq!(Page::Uber(UberPage::bootstrap()).reference_count(), 1);
    }
}
