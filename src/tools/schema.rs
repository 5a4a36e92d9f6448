//! Tool schemas: the structured-call encoding and the tagged-text encoding.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// JSON Schema for a function's parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuredSchema {
    pub parameters: serde_json::Value,
}

impl StructuredSchema {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(parameters: serde_json::Value) -> Self {
        Self { parameters }
    }

    /// An object schema with no properties.
    pub fn empty() -> Self {
        Self {
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Builder: an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Declared JSON type of a top-level property.
    pub fn property_type(&self, name: &str) -> Option<&str> {
        self.parameters
            .get("properties")?
            .get(name)?
            .get("type")?
            .as_str()
    }
}

/// Builder for structured parameter schemas.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(
        mut self,
        name: impl Into<String>,
        kind: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            serde_json::json!({
                "type": kind,
                "description": description.into(),
            }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add a string property.
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "string", description, required)
    }

    /// Add a number property.
    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "number", description, required)
    }

    /// Add an integer property.
    pub fn integer(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "integer", description, required)
    }

    /// Add a boolean property.
    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "boolean", description, required)
    }

    /// Add an array property.
    pub fn array(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        self.property(name, "array", description, required)
    }

    pub fn build(self) -> StructuredSchema {
        StructuredSchema {
            parameters: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}

/// Where a tagged parameter's value comes from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MappingKind {
    /// An attribute on the opening tag.
    Attribute,
    /// The raw text between the opening and closing tag.
    Content,
    /// The text of a nested child element, addressed by path.
    Element,
}

/// Maps one structured parameter to its place in the tagged syntax.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamMapping {
    pub param: String,
    pub kind: MappingKind,
    /// Attribute name or `/`-separated element path; unused for content.
    pub path: String,
}

/// Tagged-text encoding of a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaggedSchema {
    pub tag_name: String,
    pub mappings: Vec<ParamMapping>,
    pub example: String,
}

impl TaggedSchema {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            mappings: Vec::new(),
            example: String::new(),
        }
    }

    /// Map `param` to the attribute of the same name.
    pub fn attribute(self, param: impl Into<String>) -> Self {
        let param = param.into();
        self.mapping(param.clone(), MappingKind::Attribute, param)
    }

    /// Map `param` to the tag body.
    pub fn content(self, param: impl Into<String>) -> Self {
        self.mapping(param, MappingKind::Content, ".")
    }

    /// Map `param` to a nested element.
    pub fn element(self, param: impl Into<String>, path: impl Into<String>) -> Self {
        self.mapping(param, MappingKind::Element, path)
    }

    pub fn mapping(
        mut self,
        param: impl Into<String>,
        kind: MappingKind,
        path: impl Into<String>,
    ) -> Self {
        self.mappings.push(ParamMapping {
            param: param.into(),
            kind,
            path: path.into(),
        });
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }
}

/// Both encodings of one callable function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub structured: StructuredSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagged: Option<TaggedSchema>,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        structured: StructuredSchema,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            structured,
            tagged: None,
        }
    }

    pub fn with_tagged(mut self, tagged: TaggedSchema) -> Self {
        self.tagged = Some(tagged);
        self
    }

    /// Function definition in the common chat-completions shape.
    pub fn function_definition(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.structured.parameters,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_builder_constructs_schema() {
        let schema = StructuredSchema::object()
            .string("path", "File path", true)
            .integer("limit", "Max lines", false)
            .build();

        assert_eq!(schema.parameters["type"], "object");
        assert_eq!(schema.property_type("path"), Some("string"));
        assert_eq!(schema.property_type("limit"), Some("integer"));
        assert_eq!(schema.parameters["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn tagged_builder_records_mappings_in_order() {
        let tagged = TaggedSchema::new("create-file")
            .attribute("file_path")
            .content("file_contents")
            .element("mode", "options/mode")
            .example("<create-file file_path=\"a.txt\">hi</create-file>");

        let kinds: Vec<MappingKind> = tagged.mappings.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MappingKind::Attribute, MappingKind::Content, MappingKind::Element]
        );
        assert_eq!(tagged.mappings[2].path, "options/mode");
    }

    #[test]
    fn function_definition_wraps_parameters() {
        let schema = ToolSchema::new("ls", "List files", StructuredSchema::empty());
        let def = schema.function_definition();
        assert_eq!(def["type"], "function");
        assert_eq!(def["function"]["name"], "ls");
        assert_eq!(def["function"]["parameters"]["type"], "object");
    }
}
