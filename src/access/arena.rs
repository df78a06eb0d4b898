use crate::page::{Page, PageReference, PageSlot};
use crate::types::{Result, TesseraError};

/// Transaction-scoped storage of uncommitted trie pages.
///
/// Pages reference each other through [`PageSlot`]s; committed pages are
/// copied in before they are modified, so nothing reachable from a
/// published uber page is ever touched.
#[derive(Debug, Default)]
pub(crate) struct PageArena {
    pages: Vec<Option<Page>>,
}

impl PageArena {
    pub(crate) fn alloc(&mut self, page: Page) -> PageSlot {
        self.pages.push(Some(page));
        PageSlot(self.pages.len() - 1)
    }

    pub(crate) fn get(&self, slot: PageSlot) -> Result<&Page> {
        self.pages
            .get(slot.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| TesseraError::PageNotFound(format!("arena slot {}", slot.0)))
    }

    pub(crate) fn get_mut(&mut self, slot: PageSlot) -> Result<&mut Page> {
        self.pages
            .get_mut(slot.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| TesseraError::PageNotFound(format!("arena slot {}", slot.0)))
    }

    /// Moves a page out, leaving the slot empty.
    pub(crate) fn take(&mut self, slot: PageSlot) -> Result<Page> {
        self.pages
            .get_mut(slot.0)
            .and_then(Option::take)
            .ok_or_else(|| TesseraError::PageNotFound(format!("arena slot {}", slot.0)))
    }

    pub(crate) fn reference(&self, slot: PageSlot, index: usize) -> Result<&PageReference> {
        let page = self.get(slot)?;
        page.reference(index).ok_or_else(|| {
            TesseraError::PageNotFound(format!("{} page has no reference {index}", page.kind()))
        })
    }

    pub(crate) fn reference_mut(
        &mut self,
        slot: PageSlot,
        index: usize,
    ) -> Result<&mut PageReference> {
        let page = self.get_mut(slot)?;
        let kind = page.kind();
        page.reference_mut(index).ok_or_else(|| {
            TesseraError::PageNotFound(format!("{kind} page has no reference {index}"))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }

    pub(crate) fn clear(&mut self) {
        self.pages.clear();
    }
}
