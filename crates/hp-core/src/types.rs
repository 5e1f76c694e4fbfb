//! Settings graph type definitions
//!
//! These types mirror the JSON shapes persisted in storage and exchanged
//! through import/export, so serde field names follow the wire format
//! (`headerName`, `keepEnabled`, ...) rather than Rust convention.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_NAME: &str = "Default";
pub const DEFAULT_HEADER_NAME: &str = "X-Frame-Options";
pub const DEFAULT_HEADER_VALUE: &str = "ALLOW-FROM https://www.youtube.com/";

fn default_true() -> bool {
    true
}

// =============================================================================
// Header overrides
// =============================================================================

/// Whether a header override applies to the request or the response side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderKind {
    /// Stored records written before this field existed carry no
    /// `headerType`; they are backfilled to `request` on read.
    #[default]
    Request,
    Response,
}

/// A single header override inside a page.
///
/// The `id` is derived as `"<pageId>-<positionalIndex>"` and re-derived
/// whenever siblings are removed or reordered; consumers must not treat it
/// as stable across structural edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSetting {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "headerName", default)]
    pub name: String,
    #[serde(rename = "headerValue", default)]
    pub value: String,
    #[serde(rename = "headerEnabled", default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "headerType", default)]
    pub kind: HeaderKind,
}

impl HeaderSetting {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            value: String::new(),
            enabled: true,
            kind: HeaderKind::Request,
        }
    }
}

impl Default for HeaderSetting {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// URL filters
// =============================================================================

/// Whether a filter narrows matching to its pattern or carves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    Include,
    Exclude,
}

/// A URL filter inside a page. `value` is a regex fragment; `valid` caches
/// the result of the host engine's regex-support probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub kind: FilterKind,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub valid: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            enabled: true,
            kind: FilterKind::Include,
            value: String::new(),
            valid: true,
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Pages
// =============================================================================

/// A named, independently toggleable bundle of header overrides and URL
/// filters. Page ids are a dense `0..N-1` index, reassigned on every
/// structural edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    /// True on exactly one page: the currently selected one.
    #[serde(default)]
    pub enabled: bool,
    /// Forces the page to stay applied in the background even when another
    /// page is selected.
    #[serde(default)]
    pub keep_enabled: bool,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub headers: Vec<HeaderSetting>,
}

impl Page {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            enabled: false,
            keep_enabled: false,
            filters: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// The page installed on first run and after a full reset.
    pub fn default_page() -> Self {
        let mut page = Page::new(DEFAULT_PAGE_NAME);
        page.enabled = true;
        page.headers.push(HeaderSetting {
            id: "0-0".to_string(),
            name: DEFAULT_HEADER_NAME.to_string(),
            value: DEFAULT_HEADER_VALUE.to_string(),
            enabled: true,
            kind: HeaderKind::Request,
        });
        page
    }

    /// A page is applied if it is selected or pinned to run in the
    /// background.
    pub fn is_active(&self) -> bool {
        self.enabled || self.keep_enabled
    }
}

// =============================================================================
// Meta record
// =============================================================================

/// The small index record stored separately from the page shards. It tells
/// a reader how many `page_<n>` entries exist and which one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsMeta {
    pub version: u32,
    pub selected_page: u32,
    pub page_count: u32,
}

// =============================================================================
// Settings graph
// =============================================================================

/// The whole in-memory settings graph.
///
/// Every mutation re-establishes two invariants: page ids form a contiguous
/// `0..N-1` range, and exactly one page has `enabled == true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub pages: Vec<Page>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pages: vec![Page::default_page()],
        }
    }
}

impl Settings {
    /// Id of the selected page. The selection invariant guarantees one
    /// enabled page exists; an inconsistent graph falls back to page 0.
    pub fn selected_page(&self) -> u32 {
        self.pages
            .iter()
            .position(|p| p.enabled)
            .map(|i| i as u32)
            .unwrap_or(0)
    }

    pub fn page(&self, id: u32) -> Option<&Page> {
        self.pages.get(id as usize)
    }

    pub fn page_mut(&mut self, id: u32) -> Option<&mut Page> {
        self.pages.get_mut(id as usize)
    }

    /// Reassign page ids as a dense `0..N-1` range and re-derive header and
    /// filter ids from their positional index.
    pub fn reindex(&mut self) {
        for (page_index, page) in self.pages.iter_mut().enumerate() {
            page.id = page_index as u32;
            for (i, header) in page.headers.iter_mut().enumerate() {
                header.id = format!("{page_index}-{i}");
            }
            for (i, filter) in page.filters.iter_mut().enumerate() {
                filter.id = format!("{page_index}-{i}");
            }
        }
    }

    /// Re-establish "exactly one enabled page": keep the first enabled page
    /// and clear the rest, selecting page 0 if none is enabled.
    pub fn ensure_selection(&mut self) {
        let selected = self.pages.iter().position(|p| p.enabled).unwrap_or(0);
        for (i, page) in self.pages.iter_mut().enumerate() {
            page.enabled = i == selected;
        }
    }

    pub fn select_page(&mut self, id: u32) {
        let id = (id as usize).min(self.pages.len().saturating_sub(1));
        for (i, page) in self.pages.iter_mut().enumerate() {
            page.enabled = i == id;
        }
    }

    /// Append a new page and return its id. The new page is not selected.
    pub fn add_page(&mut self, name: &str) -> u32 {
        self.pages.push(Page::new(name));
        self.reindex();
        self.ensure_selection();
        self.pages.len() as u32 - 1
    }

    /// Remove a page. Removing the last remaining page reinstates the
    /// default page rather than leaving an empty graph.
    pub fn remove_page(&mut self, id: u32) {
        if (id as usize) < self.pages.len() {
            self.pages.remove(id as usize);
        }
        if self.pages.is_empty() {
            self.pages.push(Page::default_page());
        }
        self.reindex();
        self.ensure_selection();
    }

    pub fn move_page(&mut self, from: usize, to: usize) {
        if from >= self.pages.len() || to >= self.pages.len() || from == to {
            return;
        }
        let page = self.pages.remove(from);
        self.pages.insert(to, page);
        self.reindex();
    }

    pub fn rename_page(&mut self, id: u32, name: &str) {
        if let Some(page) = self.page_mut(id) {
            page.name = name.to_string();
        }
    }

    pub fn set_keep_enabled(&mut self, id: u32, keep: bool) {
        if let Some(page) = self.page_mut(id) {
            page.keep_enabled = keep;
        }
    }

    pub fn add_header(&mut self, page_id: u32) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        page.headers.push(HeaderSetting::new());
        self.reindex();
        true
    }

    pub fn remove_header(&mut self, page_id: u32, index: usize) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        if index >= page.headers.len() {
            return false;
        }
        page.headers.remove(index);
        self.reindex();
        true
    }

    pub fn move_header(&mut self, page_id: u32, from: usize, to: usize) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        if from >= page.headers.len() || to >= page.headers.len() || from == to {
            return false;
        }
        let header = page.headers.remove(from);
        page.headers.insert(to, header);
        self.reindex();
        true
    }

    pub fn add_filter(&mut self, page_id: u32) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        page.filters.push(Filter::new());
        self.reindex();
        true
    }

    pub fn remove_filter(&mut self, page_id: u32, index: usize) -> bool {
        let Some(page) = self.page_mut(page_id) else {
            return false;
        };
        if index >= page.filters.len() {
            return false;
        }
        page.filters.remove(index);
        self.reindex();
        true
    }

    /// Append imported pages. Incoming ids are discarded and reassigned so
    /// they cannot collide with existing pages; imported pages are never
    /// selected.
    pub fn import_pages(&mut self, incoming: Vec<Page>) -> usize {
        let count = incoming.len();
        for mut page in incoming {
            page.enabled = false;
            self.pages.push(page);
        }
        self.reindex();
        self.ensure_selection();
        count
    }

    pub fn export_pages(&self) -> Vec<Page> {
        self.pages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_graph_has_default_page() {
        let settings = Settings::default();
        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.selected_page(), 0);

        let page = &settings.pages[0];
        assert_eq!(page.name, DEFAULT_PAGE_NAME);
        assert!(page.enabled);
        assert_eq!(page.headers.len(), 1);
        assert_eq!(page.headers[0].name, DEFAULT_HEADER_NAME);
        assert_eq!(page.headers[0].value, DEFAULT_HEADER_VALUE);
        assert_eq!(page.headers[0].kind, HeaderKind::Request);
    }

    #[test]
    fn page_ids_stay_contiguous_across_mutations() {
        let mut settings = Settings::default();
        settings.add_page("Work");
        settings.add_page("Testing");
        settings.move_page(2, 0);
        settings.remove_page(1);

        let ids: Vec<u32> = settings.pages.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn exactly_one_page_selected_after_selection_changes() {
        let mut settings = Settings::default();
        settings.add_page("Work");
        settings.add_page("Testing");

        settings.select_page(2);
        assert_eq!(settings.pages.iter().filter(|p| p.enabled).count(), 1);
        assert_eq!(settings.selected_page(), 2);

        // Removing the selected page falls back to a single valid selection.
        settings.remove_page(2);
        assert_eq!(settings.pages.iter().filter(|p| p.enabled).count(), 1);

        // Out-of-range selection clamps instead of deselecting everything.
        settings.select_page(99);
        assert_eq!(settings.pages.iter().filter(|p| p.enabled).count(), 1);
    }

    #[test]
    fn removing_only_page_reinstates_default() {
        let mut settings = Settings::default();
        settings.rename_page(0, "Custom");
        settings.remove_page(0);

        assert_eq!(settings.pages.len(), 1);
        assert_eq!(settings.pages[0].name, DEFAULT_PAGE_NAME);
        assert_eq!(settings.selected_page(), 0);
    }

    #[test]
    fn import_appends_and_remaps_ids() {
        let mut settings = Settings::default();
        let incoming = vec![
            Page {
                id: 7,
                enabled: true,
                ..Page::new("Imported A")
            },
            Page {
                id: 7,
                ..Page::new("Imported B")
            },
        ];

        let count = settings.import_pages(incoming);
        assert_eq!(count, 2);

        let ids: Vec<u32> = settings.pages.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        // The pre-existing selection survives the import.
        assert_eq!(settings.selected_page(), 0);
    }

    #[test]
    fn header_ids_rederived_after_removal() {
        let mut settings = Settings::default();
        settings.add_header(0);
        settings.add_header(0);
        assert!(settings.remove_header(0, 0));

        let ids: Vec<&str> = settings.pages[0]
            .headers
            .iter()
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(ids, vec!["0-0", "0-1"]);
    }

    #[test]
    fn header_type_backfills_to_request() {
        let json = r#"{
            "id": "0-0",
            "headerName": "X-Test",
            "headerValue": "1",
            "headerEnabled": true
        }"#;
        let header: HeaderSetting = serde_json::from_str(json).expect("header should parse");
        assert_eq!(header.kind, HeaderKind::Request);
    }

    #[test]
    fn page_wire_format_uses_camel_case() {
        let mut page = Page::new("Work");
        page.keep_enabled = true;
        let json = serde_json::to_value(&page).expect("page should serialize");
        assert!(json.get("keepEnabled").is_some());
        assert!(json.get("keep_enabled").is_none());
    }
}
