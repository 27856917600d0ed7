use reel_core::commands::{BuiltinCommand, OptionSpec};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct CommandQuery {
    /// Return only this builtin.
    pub name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OptionResponse {
    pub name: String,
    pub description: String,
    /// `string`, `number` or `boolean`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub default: Option<serde_json::Value>,
}

impl From<&OptionSpec> for OptionResponse {
    fn from(spec: &OptionSpec) -> Self {
        Self {
            name: spec.name.to_owned(),
            description: spec.description.to_owned(),
            kind: serde_json::to_value(spec.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default(),
            default: spec.default.and_then(|d| serde_json::to_value(d).ok()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BuiltinCommandResponse {
    pub name: String,
    pub description: String,
    pub options: Vec<OptionResponse>,
}

impl From<&BuiltinCommand> for BuiltinCommandResponse {
    fn from(cmd: &BuiltinCommand) -> Self {
        Self {
            name: cmd.name.to_owned(),
            description: cmd.description.to_owned(),
            options: cmd.options.iter().map(OptionResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandCatalogResponse {
    pub success: bool,
    pub commands: Vec<BuiltinCommandResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandDetailResponse {
    pub success: bool,
    pub command: BuiltinCommandResponse,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn option_schema_is_rendered() {
        let convert = reel_core::commands::builtin("convert").unwrap();
        let res = BuiltinCommandResponse::from(convert);
        assert_eq!(res.name, "convert");
        let format = res.options.iter().find(|o| o.name == "format").unwrap();
        assert_eq!(format.kind, "string");
        assert!(format.default.is_some());
    }
}
