//! Stateful cursor over the items of a [`ProcessorInput`], honoring an
//! optional per-stream item filter.

use crate::types::{Item, ProcessorInput};

/// Advances over all items whose flag in `stream_flags` is true, or over
/// every item when no flags are supplied.
pub struct StreamIterator<'a> {
    part: &'a ProcessorInput,
    stream_flags: Option<&'a [bool]>,
    item_index: Option<usize>,
}

impl<'a> StreamIterator<'a> {
    pub fn new(part: &'a ProcessorInput) -> Self {
        StreamIterator {
            part,
            stream_flags: None,
            item_index: None,
        }
    }

    pub fn with_flags(part: &'a ProcessorInput, stream_flags: &'a [bool]) -> Self {
        StreamIterator {
            part,
            stream_flags: Some(stream_flags),
            item_index: None,
        }
    }

    /// Advance to the next item in the cursor's own stream.
    pub fn next(&mut self) -> Option<&'a Item> {
        let items = &self.part.batch.items;
        let mut index = self.item_index.map_or(0, |i| i + 1);

        while index < items.len() {
            match self.stream_flags {
                Some(flags) if !flags[index] => index += 1,
                _ => break,
            }
        }

        self.item_index = Some(index);
        self.current()
    }

    pub fn current(&self) -> Option<&'a Item> {
        self.part.batch.items.get(self.item_index?)
    }

    /// Index of the current item, if the cursor is on one.
    pub fn item_index(&self) -> Option<usize> {
        let index = self.item_index?;
        (index < self.part.batch.items.len()).then_some(index)
    }

    /// Whether the current item belongs to the named stream. A stream the
    /// input does not carry matches every item.
    pub fn in_stream(&self, stream_name: &str) -> bool {
        match self.part.stream_index(stream_name) {
            None => self.item_index().is_some(),
            Some(stream) => self.in_stream_index(stream),
        }
    }

    /// Same check by stream position.
    pub fn in_stream_index(&self, stream_index: usize) -> bool {
        match self.item_index() {
            Some(item_index) => self.part.stream_mask[stream_index][item_index],
            None => false,
        }
    }
}
