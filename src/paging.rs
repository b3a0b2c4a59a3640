//! Windowing of an unbounded item list into pages that fit the host's
//! per-menu item cap.
//!
//! The start/end index terms keep the existing boundary behaviour of the
//! plugin menus: interior pages start one slot late and the last page runs
//! one slot long, so the first item of every interior window is never shown.

use serde::{Deserialize, Serialize};

/// Slots taken by the previous/next controls while paging is active.
const NAV_SLOTS: usize = 2;

/// Page position for one menu. Persisted across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    #[serde(default)]
    pub current_page: usize,
    pub page_capacity: usize,
}

impl PageState {
    pub fn new(page_capacity: usize) -> Self {
        Self {
            current_page: 0,
            page_capacity,
        }
    }

    /// Step forward. The upper bound is applied by the next [`paginate`].
    pub fn page_forward(&mut self) {
        self.current_page = self.current_page.saturating_add(1);
    }

    pub fn page_backward(&mut self) {
        self.current_page = self.current_page.saturating_sub(1);
    }
}

/// One page worth of items, ready to be turned into menu entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow<T> {
    /// Leading items shown on every page
    pub controls: Vec<T>,
    pub show_previous: bool,
    pub content: Vec<T>,
    pub show_next: bool,
    pub num_pages: usize,
    pub current_page: usize,
}

impl<T> PageWindow<T> {
    /// Number of host menu slots this window occupies.
    pub fn slot_count(&self) -> usize {
        self.controls.len()
            + self.content.len()
            + usize::from(self.show_previous)
            + usize::from(self.show_next)
    }
}

/// Cut `content` down to the page selected by `state`, clamping
/// `state.current_page` to the page count computed here.
pub fn paginate<T>(controls: Vec<T>, content: Vec<T>, state: &mut PageState) -> PageWindow<T> {
    let control_count = controls.len();
    let total = control_count + content.len();

    if total <= state.page_capacity {
        state.current_page = 0;
        return PageWindow {
            controls,
            show_previous: false,
            content,
            show_next: false,
            num_pages: 1,
            current_page: 0,
        };
    }

    // A capacity too small for controls + nav still shows one item per page
    let window_size = state
        .page_capacity
        .saturating_sub(control_count + NAV_SLOTS)
        .max(1);
    let num_pages = total.div_ceil(window_size);
    let current_page = state.current_page.min(num_pages - 1);
    state.current_page = current_page;

    let start = window_size * current_page + current_page.min(1);
    let end = window_size * current_page + window_size + (current_page + 1) / num_pages;
    let end = end.min(content.len());
    let start = start.min(end);

    let content = content.into_iter().skip(start).take(end - start).collect();

    PageWindow {
        controls,
        show_previous: current_page > 0,
        content,
        show_next: current_page < num_pages - 1,
        num_pages,
        current_page,
    }
}
