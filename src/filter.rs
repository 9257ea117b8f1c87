//! Declarative message filters and the derived visible subset.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a message passes a filter for one selected
/// value.
pub type FilterPredicate = Arc<dyn Fn(&Message, &str) -> bool + Send + Sync>;

/// A selectable option offered by a filter (or a select settings field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Declarative predicate over messages.
#[derive(Clone)]
pub struct FilterSpec {
    pub id: String,
    pub label: String,
    /// Values the host UI offers for selection.
    pub options: Vec<SelectOption>,
    /// Whether several values can be selected at once.
    pub multiple: bool,
    pub predicate: FilterPredicate,
}

impl FilterSpec {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        options: Vec<SelectOption>,
        multiple: bool,
        predicate: impl Fn(&Message, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            options,
            multiple,
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("options", &self.options)
            .field("multiple", &self.multiple)
            .finish_non_exhaustive()
    }
}

/// Current selection for one filter.
///
/// Persists as the same shape the record always had: a single string, a
/// string array, or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSelection {
    One(Option<String>),
    Many(Vec<String>),
}

impl FilterSelection {
    /// An empty selection never excludes messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(sel) => sel.is_none(),
            Self::Many(values) => values.is_empty(),
        }
    }
}

/// Mapping from filter id to its current selection.
pub type FilterState = HashMap<String, FilterSelection>;

/// Seed a filter state with empty selections for every spec.
#[must_use]
pub fn empty_state(specs: &[FilterSpec]) -> FilterState {
    specs
        .iter()
        .map(|f| {
            let sel = if f.multiple {
                FilterSelection::Many(Vec::new())
            } else {
                FilterSelection::One(None)
            };
            (f.id.clone(), sel)
        })
        .collect()
}

/// Messages satisfying every filter's predicate for every currently
/// selected value. An empty selection on a filter passes everything
/// through.
#[must_use]
pub fn visible<'a>(
    messages: &'a [Message],
    specs: &[FilterSpec],
    state: &FilterState,
) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|m| {
            specs.iter().all(|spec| {
                let Some(selection) = state.get(&spec.id) else {
                    return true;
                };
                match selection {
                    FilterSelection::One(None) => true,
                    FilterSelection::One(Some(value)) => (spec.predicate)(m, value),
                    FilterSelection::Many(values) => {
                        values.iter().all(|v| (spec.predicate)(m, v))
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Sender};

    fn sender_filter(multiple: bool) -> FilterSpec {
        FilterSpec::new(
            "sender",
            "Sender",
            vec![
                SelectOption::new("User", "user"),
                SelectOption::new("Bot", "bot"),
            ],
            multiple,
            |m, value| match value {
                "user" => m.sender == Sender::User,
                "bot" => m.sender == Sender::Bot,
                _ => false,
            },
        )
    }

    fn log() -> Vec<Message> {
        vec![Message::user("hi"), Message::bot("hello"), Message::user("ok")]
    }

    #[test]
    fn empty_selection_passes_everything() {
        let specs = vec![sender_filter(false)];
        let state = empty_state(&specs);
        let messages = log();
        assert_eq!(visible(&messages, &specs, &state).len(), messages.len());
    }

    #[test]
    fn single_selection_narrows() {
        let specs = vec![sender_filter(false)];
        let mut state = empty_state(&specs);
        state.insert("sender".into(), FilterSelection::One(Some("user".into())));
        let messages = log();
        let shown = visible(&messages, &specs, &state);
        assert_eq!(shown.len(), 2);
        assert!(shown.iter().all(|m| m.sender == Sender::User));
    }

    #[test]
    fn multiple_values_must_all_pass() {
        let specs = vec![sender_filter(true)];
        let mut state = empty_state(&specs);
        state.insert(
            "sender".into(),
            FilterSelection::Many(vec!["user".into(), "bot".into()]),
        );
        let messages = log();
        // No message is both user and bot.
        assert!(visible(&messages, &specs, &state).is_empty());
    }

    #[test]
    fn visible_is_always_a_subset() {
        let specs = vec![sender_filter(false)];
        let mut state = empty_state(&specs);
        state.insert("sender".into(), FilterSelection::One(Some("bot".into())));
        let messages = log();
        let shown = visible(&messages, &specs, &state);
        assert!(shown.len() <= messages.len());
    }

    #[test]
    fn selection_state_roundtrips_as_plain_json() {
        let mut state = FilterState::new();
        state.insert("a".into(), FilterSelection::One(Some("x".into())));
        state.insert("b".into(), FilterSelection::Many(vec!["y".into()]));
        state.insert("c".into(), FilterSelection::One(None));
        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["a"], "x");
        assert_eq!(json["b"][0], "y");
        assert!(json["c"].is_null());
        let back: FilterState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, state);
    }
}
