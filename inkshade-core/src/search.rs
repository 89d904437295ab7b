//! Full-text search over the flattened text streams of every page.
//!
//! Each page contributes its layout text with a single space inserted where
//! two lines join without whitespace. Matches are reported in stream offsets
//! and mapped back to layout offsets for highlighting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{CoreError, CoreResult};
use crate::geometry::Quad;
use crate::layout::{is_word_char, TextLayoutIndex};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            case_sensitive: false,
            whole_word: false,
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn whole_word(mut self, yes: bool) -> Self {
        self.whole_word = yes;
        self
    }

    fn needle(&self) -> Vec<char> {
        if self.case_sensitive {
            self.text.chars().collect()
        } else {
            self.text.chars().map(fold).collect()
        }
    }
}

/// `start..end` in the stream of `page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchMatch {
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

/// Lowercases a character when that keeps it a single character, so folded
/// and original streams stay offset-aligned.
fn fold(ch: char) -> char {
    let mut lower = ch.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(single), None) => single,
        _ => ch,
    }
}

#[derive(Debug, Clone, Default)]
pub struct PageStream {
    page: usize,
    revision: Option<u64>,
    chars: Vec<char>,
    folded: Vec<char>,
    to_layout: Vec<Option<usize>>,
}

impl PageStream {
    pub fn empty(page: usize) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn from_layout(layout: &TextLayoutIndex) -> Self {
        let mut chars = Vec::with_capacity(layout.len() + layout.lines().len());
        let mut to_layout = Vec::with_capacity(chars.capacity());
        for (line_no, line) in layout.lines().iter().enumerate() {
            if line_no > 0 && !chars.last().map_or(true, |c: &char| c.is_whitespace()) {
                chars.push(' ');
                to_layout.push(None);
            }
            for offset in line.start..line.end {
                if let Some(glyph) = layout.glyph(offset) {
                    chars.push(glyph.ch);
                    to_layout.push(Some(offset));
                }
            }
        }
        let folded = chars.iter().copied().map(fold).collect();
        Self {
            page: layout.page(),
            revision: Some(layout.revision()),
            chars,
            folded,
            to_layout,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Layout offsets covered by stream range `start..end`.
    pub fn layout_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let slice = self.to_layout.get(start..end.min(self.to_layout.len()))?;
        let first = slice.iter().find_map(|o| *o)?;
        let last = slice.iter().rev().find_map(|o| *o)?;
        Some((first, last + 1))
    }

    /// First acceptable match starting at or after `from`.
    fn find_from(&self, query: &SearchQuery, needle: &[char], from: usize) -> Option<(usize, usize)> {
        if needle.is_empty() || needle.len() > self.chars.len() {
            return None;
        }
        let haystack = if query.case_sensitive {
            &self.chars
        } else {
            &self.folded
        };
        let last_start = haystack.len() - needle.len();
        let mut start = from;
        while start <= last_start {
            if haystack[start..start + needle.len()] == *needle {
                let end = start + needle.len();
                if !query.whole_word || self.is_word_boundary(start, end) {
                    return Some((start, end));
                }
            }
            start += 1;
        }
        None
    }

    fn is_word_boundary(&self, start: usize, end: usize) -> bool {
        let before = start
            .checked_sub(1)
            .and_then(|i| self.chars.get(i))
            .map_or(false, |c| is_word_char(*c));
        let after = self.chars.get(end).map_or(false, |c| is_word_char(*c));
        !before && !after
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    pages: Vec<PageStream>,
}

impl SearchIndex {
    /// Flattens every page in parallel. `None` entries are pages without a
    /// text layer (or whose layout is not built yet).
    pub fn build(layouts: &[Option<Arc<TextLayoutIndex>>]) -> Self {
        let pages = layouts
            .par_iter()
            .enumerate()
            .map(|(page, layout)| match layout {
                Some(layout) => PageStream::from_layout(layout),
                None => PageStream::empty(page),
            })
            .collect();
        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, page: usize) -> Option<&PageStream> {
        self.pages.get(page)
    }

    /// Re-flattens a single page after its layout was rebuilt.
    pub fn update_page(&mut self, page: usize, layout: Option<&TextLayoutIndex>) {
        if page >= self.pages.len() {
            self.pages
                .extend((self.pages.len()..=page).map(PageStream::empty));
        }
        self.pages[page] = match layout {
            Some(layout) => PageStream::from_layout(layout),
            None => PageStream::empty(page),
        };
    }

    pub fn revisions(&self) -> Vec<Option<u64>> {
        self.pages.iter().map(PageStream::revision).collect()
    }

    pub fn matches<'a>(&'a self, query: &SearchQuery) -> Matches<'a> {
        Matches {
            index: self,
            query: query.clone(),
            needle: query.needle(),
            page: 0,
            cursor: 0,
        }
    }

    pub fn find(&self, query: &SearchQuery) -> Vec<SearchMatch> {
        self.matches(query).collect()
    }

    pub fn find_on_page(&self, query: &SearchQuery, page: usize) -> Vec<SearchMatch> {
        let mut matches = self.matches(query);
        matches.page = page;
        matches.take_while(|m| m.page == page).collect()
    }

    pub fn layout_range(&self, found: &SearchMatch) -> Option<(usize, usize)> {
        self.pages.get(found.page)?.layout_range(found.start, found.end)
    }

    /// Highlight quads for `found`, given the layout of its page.
    pub fn quads_for_match(&self, found: &SearchMatch, layout: &TextLayoutIndex) -> Vec<Quad> {
        match self.layout_range(found) {
            Some((start, end)) => layout.quads_for(start, end),
            None => Vec::new(),
        }
    }
}

/// Lazy, ordered, non-overlapping matches. Clone or [`Matches::restart`] to
/// iterate again.
#[derive(Debug, Clone)]
pub struct Matches<'a> {
    index: &'a SearchIndex,
    query: SearchQuery,
    needle: Vec<char>,
    page: usize,
    cursor: usize,
}

impl Matches<'_> {
    pub fn restart(&mut self) {
        self.page = 0;
        self.cursor = 0;
    }
}

impl Iterator for Matches<'_> {
    type Item = SearchMatch;

    fn next(&mut self) -> Option<SearchMatch> {
        while let Some(stream) = self.index.pages.get(self.page) {
            if let Some((start, end)) = stream.find_from(&self.query, &self.needle, self.cursor) {
                self.cursor = end;
                return Some(SearchMatch {
                    page: self.page,
                    start,
                    end,
                });
            }
            self.page += 1;
            self.cursor = 0;
        }
        None
    }
}

fn next_index(current: Option<usize>, len: usize) -> CoreResult<usize> {
    if len == 0 {
        return Err(CoreError::NoMatches);
    }
    Ok(match current {
        Some(i) if i + 1 < len => i + 1,
        _ => 0,
    })
}

fn previous_index(current: Option<usize>, len: usize) -> CoreResult<usize> {
    if len == 0 {
        return Err(CoreError::NoMatches);
    }
    Ok(match current {
        Some(i) if i > 0 && i <= len => i - 1,
        _ => len - 1,
    })
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    query: SearchQuery,
    matches: Vec<SearchMatch>,
    current: Option<usize>,
}

impl SearchResults {
    pub fn new(query: SearchQuery, matches: Vec<SearchMatch>) -> Self {
        Self {
            query,
            matches,
            current: None,
        }
    }

    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current(&self) -> Option<&SearchMatch> {
        self.current.and_then(|i| self.matches.get(i))
    }

    pub fn next(&mut self) -> CoreResult<SearchMatch> {
        let index = next_index(self.current, self.matches.len())?;
        self.current = Some(index);
        Ok(self.matches[index])
    }

    pub fn previous(&mut self) -> CoreResult<SearchMatch> {
        let index = previous_index(self.current, self.matches.len())?;
        self.current = Some(index);
        Ok(self.matches[index])
    }
}

#[derive(Debug)]
struct SearchOutcome {
    generation: u64,
    query: SearchQuery,
    matches: Vec<SearchMatch>,
    revisions: Vec<Option<u64>>,
}

#[derive(Debug)]
struct PendingSearch {
    generation: u64,
    receiver: oneshot::Receiver<SearchOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Idle,
    Pending,
    Ready,
    Superseded,
}

/// Owns the search index and the current results. Background queries are
/// tagged with a generation; only the latest one is ever installed.
#[derive(Debug, Default)]
pub struct SearchEngine {
    index: Arc<SearchIndex>,
    generation: Arc<AtomicU64>,
    pending: Option<PendingSearch>,
    results: Option<SearchResults>,
}

impl SearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    pub fn rebuild(&mut self, layouts: &[Option<Arc<TextLayoutIndex>>]) {
        self.index = Arc::new(SearchIndex::build(layouts));
        debug!(pages = layouts.len(), "search index rebuilt");
    }

    pub fn update_page(&mut self, page: usize, layout: Option<&TextLayoutIndex>) {
        Arc::make_mut(&mut self.index).update_page(page, layout);
    }

    pub fn results(&self) -> Option<&SearchResults> {
        self.results.as_ref()
    }

    pub fn results_mut(&mut self) -> Option<&mut SearchResults> {
        self.results.as_mut()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Runs `query` on the calling thread and installs the results,
    /// superseding any background query.
    pub fn find(&mut self, query: SearchQuery) -> &SearchResults {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.pending = None;
        let matches = self.index.find(&query);
        self.results.insert(SearchResults::new(query, matches))
    }

    /// Starts `query` on a worker thread. Returns its generation.
    pub fn submit(&mut self, query: SearchQuery) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = oneshot::channel();
        let index = Arc::clone(&self.index);
        let latest = Arc::clone(&self.generation);

        rayon::spawn(move || {
            let mut matches = Vec::new();
            for found in index.matches(&query) {
                if latest.load(Ordering::SeqCst) != generation {
                    trace!(generation, "search abandoned");
                    return;
                }
                matches.push(found);
            }
            let _ = sender.send(SearchOutcome {
                generation,
                query,
                matches,
                revisions: index.revisions(),
            });
        });

        self.pending = Some(PendingSearch {
            generation,
            receiver,
        });
        generation
    }

    pub fn poll(&mut self) -> PollStatus {
        let Some(pending) = self.pending.as_mut() else {
            return PollStatus::Idle;
        };
        match pending.receiver.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => PollStatus::Pending,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                PollStatus::Superseded
            }
            Ok(outcome) => {
                self.pending = None;
                if outcome.generation != self.generation.load(Ordering::SeqCst) {
                    debug!(generation = outcome.generation, "search result superseded");
                    return PollStatus::Superseded;
                }
                let outcome = self.refresh_stale_pages(outcome);
                self.results = Some(SearchResults::new(outcome.query, outcome.matches));
                PollStatus::Ready
            }
        }
    }

    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.pending = None;
    }

    pub fn clear(&mut self) {
        self.cancel();
        self.results = None;
    }

    fn check_fresh(&self, outcome: &SearchOutcome) -> CoreResult<()> {
        let current = self.index.revisions();
        let width = current.len().max(outcome.revisions.len());
        for page in 0..width {
            let then = outcome.revisions.get(page).copied().flatten();
            let now = current.get(page).copied().flatten();
            if then != now {
                return Err(CoreError::IndexStale { page });
            }
        }
        Ok(())
    }

    /// Pages re-flattened while the worker ran are searched again against
    /// the current index.
    fn refresh_stale_pages(&self, mut outcome: SearchOutcome) -> SearchOutcome {
        while let Err(CoreError::IndexStale { page }) = self.check_fresh(&outcome) {
            trace!(page, "re-querying stale page");
            outcome.matches.retain(|m| m.page != page);
            outcome
                .matches
                .extend(self.index.find_on_page(&outcome.query, page));
            outcome.matches.sort();
            let revision = self.index.page(page).and_then(PageStream::revision);
            if outcome.revisions.len() <= page {
                outcome.revisions.resize(page + 1, None);
            }
            outcome.revisions[page] = revision;
        }
        outcome
    }
}
