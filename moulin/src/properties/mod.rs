//! Configuration and status sink.
//!
//! A visitor-style interface the driver and the nodes publish their
//! configuration through. Recorders decide what to do with it: the JSON
//! recorders in this module dump a graph to a value and load it back; a UI
//! recorder would render widgets instead (`is_ui`).
//!
//! Ids are stable identifiers; two options in the same child must not share
//! one.

mod json_dump;
mod json_load;

pub use json_dump::JsonDumpProperties;
pub use json_load::JsonLoadProperties;

pub trait Properties {
    /// Whether the recorder is an interactive UI. Edit-only controls are
    /// skipped for non-UI recorders.
    fn is_ui(&self) -> bool {
        false
    }

    /// Opens a child section. When true is returned the section must be
    /// closed with [`end_child`](Properties::end_child).
    #[must_use]
    fn begin_child(&mut self, id: &str, label: &str) -> bool;

    fn end_child(&mut self);

    /// Known child ids, if the recorder supports lookahead. Used when
    /// reconstructing a graph from a loaded dump.
    fn list_children(&self) -> Vec<String> {
        Vec::new()
    }

    /// Visual separator; no meaning for identification.
    fn separate(&mut self, _label: &str) {}

    /// Status output; never read back.
    fn output_text(&mut self, _text: &str) {}

    // All config accessors return true if the value changed.

    fn config_bool(&mut self, id: &str, value: &mut bool, desc: &str) -> bool;
    fn config_u32(&mut self, id: &str, value: &mut u32, desc: &str) -> bool;
    fn config_u64(&mut self, id: &str, value: &mut u64, desc: &str) -> bool;
    fn config_f32(&mut self, id: &str, value: &mut f32, desc: &str) -> bool;
    fn config_text(&mut self, id: &str, value: &mut String, desc: &str) -> bool;

    /// Selection among `options`; `value` is the selected index.
    fn config_options(&mut self, id: &str, value: &mut usize, options: &[&str], desc: &str)
        -> bool;

    /// Passes a raw JSON value through the recorder. Returns true if `value`
    /// was replaced with stored data (load direction).
    fn serialize_json(&mut self, id: &str, value: &mut serde_json::Value) -> bool;
}
