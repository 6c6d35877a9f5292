//! Tool call records and incremental merging of streamed fragments.
//!
//! Providers emit tool calls as partial fragments spread over many chunks:
//! the first fragment usually carries the id and function name, later ones
//! append slices of the argument string. [`merge_tool_call_deltas`] folds one
//! batch of fragments into an existing ordered collection of records.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Discriminator for a tool call record. Function calls are the only kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    #[default]
    Function,
}

/// The function invocation carried by a tool call record.
///
/// `arguments` is a plain string accumulator: fragments are concatenated as
/// they arrive and the value is only parseable JSON once the call's stream
/// has completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One complete (or still-growing) tool call.
///
/// `id` is assigned by the provider and may be empty on records created from
/// providers that never send one. Within one collection at most one record
/// carries any given non-empty id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

/// A partial tool call fragment from one streamed chunk.
///
/// `index` is a placement hint only; routing always prefers the id when one
/// is present, because providers reorder and interleave fragments across
/// positions for the same logical call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolCallKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

/// Partial function fields inside a [`ToolCallDelta`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    fn argument_fragment(&self) -> Option<&str> {
        self.function.as_ref().and_then(|f| f.arguments.as_deref())
    }

    fn nonempty_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Promote a fragment to a brand-new record.
///
/// A new record needs a `function` object with a `name` field (the name may
/// be an empty string). The discriminator defaults to `function` when the
/// fragment omits it.
fn new_record(delta: &ToolCallDelta) -> Result<ToolCallRecord> {
    let Some(function) = delta.function.as_ref() else {
        return Err(RelayError::schema(["function"]));
    };
    let Some(name) = function.name.clone() else {
        return Err(RelayError::schema(["function", "name"]));
    };
    Ok(ToolCallRecord {
        id: delta.id.clone().unwrap_or_default(),
        kind: delta.kind.unwrap_or_default(),
        function: FunctionCall {
            name,
            arguments: function.arguments.clone().unwrap_or_default(),
        },
    })
}

/// Fold a batch of fragments into an existing ordered collection of records.
///
/// Returns a new collection; `origin` is never modified, so callers can keep
/// a reference to the previous state for diffing. No call is ever silently
/// dropped: a fragment either continues an existing record or creates a new
/// one, and a fragment that cannot be promoted to a record fails the whole
/// merge with [`RelayError::SchemaError`].
pub fn merge_tool_call_deltas(
    origin: &[ToolCallRecord],
    batch: &[ToolCallDelta],
) -> Result<Vec<ToolCallRecord>> {
    if origin.is_empty() {
        // First chunk of a stream: every fragment opens a new record.
        return batch.iter().map(new_record).collect();
    }

    let mut merged = origin.to_vec();
    for delta in batch {
        // Id routing comes before any index logic.
        if let Some(id) = delta.nonempty_id()
            && let Some(record) = merged.iter_mut().find(|r| r.id == id)
        {
            if let Some(fragment) = delta.argument_fragment() {
                record.function.arguments.push_str(fragment);
            }
            continue;
        }

        // None: the position is vacant. Some(true): the slot is taken by a
        // different call (providers reuse index 0 for parallel calls).
        // Some(false): continuation of the record at the position.
        let occupied_by_other = merged.get(delta.index).map(|existing| {
            !existing.id.is_empty()
                && delta
                    .nonempty_id()
                    .is_some_and(|id| id != existing.id)
        });

        match occupied_by_other {
            None => {
                let record = new_record(delta)?;
                let at = delta.index.min(merged.len());
                merged.insert(at, record);
            }
            Some(true) => {
                merged.push(new_record(delta)?);
            }
            Some(false) => {
                if let Some(fragment) = delta.argument_fragment() {
                    merged[delta.index].function.arguments.push_str(fragment);
                }
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            kind: Some(ToolCallKind::Function),
            function: Some(FunctionCallDelta {
                name: name.map(str::to_string),
                arguments: args.map(str::to_string),
            }),
        }
    }

    #[test]
    fn empty_origin_creates_records_in_batch_order() {
        let merged = merge_tool_call_deltas(
            &[],
            &[delta(0, Some("1"), Some("f"), Some(""))],
        )
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "1");
        assert_eq!(merged[0].function.name, "f");
        assert_eq!(merged[0].function.arguments, "");
    }

    #[test]
    fn continuation_appends_arguments_without_new_record() {
        let origin = merge_tool_call_deltas(&[], &[delta(0, Some("1"), Some("f"), Some(""))]).unwrap();

        let continuation = ToolCallDelta {
            index: 0,
            id: None,
            kind: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some("{\"a".to_string()),
            }),
        };
        let merged = merge_tool_call_deltas(&origin, &[continuation]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].function.arguments, "{\"a");
        // copy-on-write: the origin is untouched
        assert_eq!(origin[0].function.arguments, "");
    }

    #[test]
    fn id_match_wins_over_position() {
        let origin = vec![
            ToolCallRecord {
                id: "1".to_string(),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: "get_weather".to_string(),
                    arguments: "{\"city\":\"Hang".to_string(),
                },
            },
            ToolCallRecord {
                id: "2".to_string(),
                kind: ToolCallKind::Function,
                function: FunctionCall {
                    name: "get_time".to_string(),
                    arguments: String::new(),
                },
            },
        ];
        // addressed at index 0 but carrying the id of the record at index 1
        let merged =
            merge_tool_call_deltas(&origin, &[delta(0, Some("2"), None, Some("{}"))]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].function.arguments, "{}");
        assert_eq!(merged[0].function.arguments, "{\"city\":\"Hang");
    }

    #[test]
    fn parallel_call_sharing_a_slot_is_appended_at_the_end() {
        let origin =
            merge_tool_call_deltas(&[], &[delta(0, Some("1"), Some("f"), Some("...Hangzhou..."))])
                .unwrap();
        let merged =
            merge_tool_call_deltas(&origin, &[delta(0, Some("2"), Some("f"), Some(""))]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "1");
        assert_eq!(merged[0].function.arguments, "...Hangzhou...");
        assert_eq!(merged[1].id, "2");
    }

    #[test]
    fn vacant_index_inserts_a_new_record_at_that_position() {
        let origin = merge_tool_call_deltas(&[], &[delta(0, Some("1"), Some("f"), Some(""))]).unwrap();
        let merged =
            merge_tool_call_deltas(&origin, &[delta(1, Some("2"), Some("g"), Some(""))]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, "2");
        assert_eq!(merged[1].function.name, "g");
    }

    #[test]
    fn index_hint_past_the_end_clamps_to_the_collection_length() {
        let origin = merge_tool_call_deltas(&[], &[delta(0, Some("1"), Some("f"), Some(""))]).unwrap();
        let merged =
            merge_tool_call_deltas(&origin, &[delta(5, Some("9"), Some("h"), Some(""))]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].id, "9");
    }

    #[test]
    fn missing_function_object_fails_with_the_field_path() {
        let origin = merge_tool_call_deltas(&[], &[delta(0, Some("1"), Some("f"), Some(""))]).unwrap();
        let bad = ToolCallDelta {
            index: 1,
            id: Some("2".to_string()),
            kind: Some(ToolCallKind::Function),
            function: None,
        };
        let err = merge_tool_call_deltas(&origin, &[bad]).unwrap_err();
        match err {
            RelayError::SchemaError { path } => assert_eq!(path, vec!["function".to_string()]),
            other => panic!("expected SchemaError, got {other:?}"),
        }
    }

    #[test]
    fn missing_name_on_a_new_record_fails_with_the_nested_path() {
        let bad = ToolCallDelta {
            index: 0,
            id: Some("1".to_string()),
            kind: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some("{}".to_string()),
            }),
        };
        let err = merge_tool_call_deltas(&[], &[bad]).unwrap_err();
        match err {
            RelayError::SchemaError { path } => {
                assert_eq!(path, vec!["function".to_string(), "name".to_string()]);
            }
            other => panic!("expected SchemaError, got {other:?}"),
        }
    }

    #[test]
    fn empty_batch_returns_an_equivalent_collection() {
        let origin = merge_tool_call_deltas(
            &[],
            &[delta(0, Some("1"), Some("f"), Some("{\"q\":1}"))],
        )
        .unwrap();
        let merged = merge_tool_call_deltas(&origin, &[]).unwrap();
        assert_eq!(merged, origin);
    }

    #[test]
    fn wire_shape_round_trips_through_serde() {
        let json = r#"{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":"{\"q\":\"rust\"}"}}"#;
        let parsed: ToolCallDelta = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("call_1"));
        let record = merge_tool_call_deltas(&[], &[parsed]).unwrap();
        assert_eq!(record[0].function.name, "lookup");
        assert_eq!(record[0].function.arguments, "{\"q\":\"rust\"}");
    }
}
