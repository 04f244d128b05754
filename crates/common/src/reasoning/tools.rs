//! Tool registry contract and the course tool catalog

use super::types::ToolInput;
use crate::errors::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SEARCH_COURSE_CONTENT: &str = "search_course_content";
pub const GET_COURSE_OUTLINE: &str = "get_course_outline";

/// Tool description handed verbatim to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool input, with its `required` list
    pub input_schema: Value,
}

/// Trait for executing tools by name
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Execute a tool; registries may also report failure through the returned text
    async fn execute(&self, name: &str, input: &ToolInput) -> Result<String, ToolError>;

    /// Static catalog of the tools this registry serves
    fn definitions(&self) -> Vec<ToolDefinition> {
        course_tool_catalog()
    }
}

/// Catalog of the two course tools
pub fn course_tool_catalog() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SEARCH_COURSE_CONTENT.to_string(),
            description: "Search course materials with smart course name matching and lesson filtering"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to search for in the course content"
                    },
                    "course_name": {
                        "type": "string",
                        "description": "Course title (partial matches work)"
                    },
                    "lesson_number": {
                        "type": "integer",
                        "description": "Specific lesson number to search within"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: GET_COURSE_OUTLINE.to_string(),
            description: "Get course outline including title, link, and complete lesson list with lesson numbers and titles"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "course_name": {
                        "type": "string",
                        "description": "Course title or partial name to get outline for"
                    }
                },
                "required": ["course_name"]
            }),
        },
    ]
}
