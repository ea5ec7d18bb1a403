//! The browser-tab tool catalog.
//!
//! Every tool is relayed to the extension under its own name once its
//! arguments validate against the tool's field list.

use std::fmt;

use serde_json::{Map, Value, json};

/// Tab group colors supported by Chrome.
pub const GROUP_COLORS: [&str; 9] = [
    "grey", "blue", "red", "yellow", "green", "pink", "purple", "cyan", "orange",
];

/// Type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Non-empty array of numbers (tab or group ids).
    IdList,
    Number,
    Text,
    /// One of [`GROUP_COLORS`].
    Color,
}

/// One declared argument of a tool.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

const fn required(name: &'static str, kind: FieldKind, description: &'static str) -> Field {
    Field {
        name,
        kind,
        required: true,
        description,
    }
}

const fn optional(name: &'static str, kind: FieldKind, description: &'static str) -> Field {
    Field {
        name,
        kind,
        required: false,
        description,
    }
}

/// A tool exposed to the MCP host.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub fields: &'static [Field],
}

/// Why a tool's arguments were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("arguments must be an object")]
    NotAnObject,

    #[error("missing required argument `{0}`")]
    Missing(&'static str),

    #[error("argument `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: FieldKind,
    },

    #[error("argument `{0}` must contain at least one id")]
    Empty(&'static str),

    #[error("argument `{field}` has unsupported color `{value}`")]
    UnknownColor { field: &'static str, value: String },
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::IdList => write!(f, "an array of numbers"),
            FieldKind::Number => write!(f, "a number"),
            FieldKind::Text => write!(f, "a string"),
            FieldKind::Color => write!(f, "a color name"),
        }
    }
}

impl ToolSpec {
    /// JSON Schema of the tool's arguments, as listed by `tools/list`.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            let mut schema = match field.kind {
                FieldKind::IdList => json!({
                    "type": "array",
                    "items": { "type": "number" },
                    "minItems": 1,
                }),
                FieldKind::Number => json!({ "type": "number" }),
                FieldKind::Text => json!({ "type": "string" }),
                FieldKind::Color => json!({ "type": "string", "enum": GROUP_COLORS }),
            };
            schema["description"] = json!(field.description);
            properties.insert(field.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// The entry returned for this tool by `tools/list`.
    pub fn definition(&self) -> Value {
        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    /// Checks `args` and returns them with undeclared keys removed.
    ///
    /// A missing `args` is treated as an empty object. Optional fields
    /// given as `null` are dropped.
    pub fn validate(&self, args: Option<&Value>) -> Result<Value, ArgumentError> {
        let empty = Map::new();
        let object = match args {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => return Err(ArgumentError::NotAnObject),
        };

        let mut clean = Map::new();
        for field in self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(ArgumentError::Missing(field.name));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    check_field(field, value)?;
                    clean.insert(field.name.to_string(), value.clone());
                }
            }
        }
        Ok(Value::Object(clean))
    }
}

fn check_field(field: &Field, value: &Value) -> Result<(), ArgumentError> {
    let wrong_type = || ArgumentError::WrongType {
        field: field.name,
        expected: field.kind,
    };
    match field.kind {
        FieldKind::IdList => {
            let items = value.as_array().ok_or_else(wrong_type)?;
            if !items.iter().all(Value::is_number) {
                return Err(wrong_type());
            }
            if items.is_empty() {
                return Err(ArgumentError::Empty(field.name));
            }
        }
        FieldKind::Number => {
            if !value.is_number() {
                return Err(wrong_type());
            }
        }
        FieldKind::Text => {
            if !value.is_string() {
                return Err(wrong_type());
            }
        }
        FieldKind::Color => {
            let color = value.as_str().ok_or_else(wrong_type)?;
            if !GROUP_COLORS.contains(&color) {
                return Err(ArgumentError::UnknownColor {
                    field: field.name,
                    value: color.to_string(),
                });
            }
        }
    }
    Ok(())
}

const INDEX_HELP: &str = "The new position index. Use 0 for the start, -1 for the end.";

static TOOLS: [ToolSpec; 12] = [
    ToolSpec {
        name: "SNAPSHOT_MCP",
        title: "Get window snapshot",
        description: "Get the current window tabs organized as a nested tree structure. \
                      Returns groups and their child tabs, along with standalone tabs, titles, and URLs.",
        fields: &[],
    },
    ToolSpec {
        name: "CLOSE_GROUPS_MCP",
        title: "Close groups",
        description: "Close specific browser groups and all their contained tabs.",
        fields: &[required(
            "groupIds",
            FieldKind::IdList,
            "List of group identifiers (integers) to close.",
        )],
    },
    ToolSpec {
        name: "UNGROUPS_MCP",
        title: "Ungroup groups",
        description: "Ungroup specific browser groups using their group IDs. The tabs will become standalone.",
        fields: &[required(
            "groupIds",
            FieldKind::IdList,
            "List of group identifiers (integers) to ungroup.",
        )],
    },
    ToolSpec {
        name: "CLOSE_TABS_MCP",
        title: "Close tabs",
        description: "Close specific browser tabs using their unique IDs.",
        fields: &[required(
            "tabIds",
            FieldKind::IdList,
            "List of specific tab identifiers (integers) to close.",
        )],
    },
    ToolSpec {
        name: "PIN_TABS_MCP",
        title: "Pin tabs",
        description: "Pin specific browser tabs using their unique IDs.",
        fields: &[required(
            "tabIds",
            FieldKind::IdList,
            "List of specific tab identifiers (integers) to pin.",
        )],
    },
    ToolSpec {
        name: "UNPIN_TABS_MCP",
        title: "Unpin tabs",
        description: "Unpin specific browser tabs using their unique IDs.",
        fields: &[required(
            "tabIds",
            FieldKind::IdList,
            "List of specific tab identifiers (integers) to unpin.",
        )],
    },
    ToolSpec {
        name: "UNGROUP_TABS_MCP",
        title: "Ungroup tabs",
        description: "Remove specific tabs from their assigned groups using their tab IDs. \
                      The tabs will become standalone.",
        fields: &[required(
            "tabIds",
            FieldKind::IdList,
            "List of specific tab identifiers (integers) to remove from their groups.",
        )],
    },
    ToolSpec {
        name: "ADD_TO_GROUP_MCP",
        title: "Add tabs to group",
        description: "Move specific tabs into an existing browser group.",
        fields: &[
            required(
                "tabIds",
                FieldKind::IdList,
                "List of tab IDs to move into the target group.",
            ),
            required(
                "groupId",
                FieldKind::Number,
                "The integer ID of an existing group to move the tabs into.",
            ),
        ],
    },
    ToolSpec {
        name: "MOVE_GROUP_MCP",
        title: "Move group",
        description: "Reposition a browser group to a new index.",
        fields: &[
            required("groupId", FieldKind::Number, "The ID of the group to move."),
            required("index", FieldKind::Number, INDEX_HELP),
        ],
    },
    ToolSpec {
        name: "MOVE_TABS_MCP",
        title: "Move tabs",
        description: "Move one or more tabs to a specific index position. \
                      Multiple tabs will be placed contiguously starting at the target index.",
        fields: &[
            required("tabIds", FieldKind::IdList, "List of tab IDs to move."),
            required("index", FieldKind::Number, INDEX_HELP),
        ],
    },
    ToolSpec {
        name: "ADD_TO_NEW_GROUP_MCP",
        title: "Create group",
        description: "Create a new browser group from a list of tabs, with a title and color.",
        fields: &[
            required(
                "tabIds",
                FieldKind::IdList,
                "List of tab IDs to group together into the new group.",
            ),
            required("title", FieldKind::Text, "The title of the new group"),
            required(
                "color",
                FieldKind::Color,
                "The color of the new group. Must be one of the supported Chrome colors.",
            ),
        ],
    },
    ToolSpec {
        name: "UPDATE_GROUP_MCP",
        title: "Update group",
        description: "Update the title or color of an existing browser group. \
                      At least one property (title or color) should be provided.",
        fields: &[
            required("groupId", FieldKind::Number, "The ID of the group to update"),
            optional(
                "title",
                FieldKind::Text,
                "The new title. Leave undefined to keep the current title.",
            ),
            optional(
                "color",
                FieldKind::Color,
                "The new color. Leave undefined to keep the current color.",
            ),
        ],
    },
];

/// All tools, in listing order.
pub fn tools() -> &'static [ToolSpec] {
    &TOOLS
}

/// Looks a tool up by name.
pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}
