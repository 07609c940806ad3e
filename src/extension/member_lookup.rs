//! Member-lookup reference extension
//!
//! The minimal worked example of the extension contract: configured with a
//! `typeid` naming a built-in type, it answers the command of that name with
//! the constants of that type visible at the requested location.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::analysis::{BuiltinTypeId, MemberKind};
use crate::error::{Result, ServerError};
use crate::extension::{CommandEvent, Extension, ExtensionContext};
use crate::uri::DocumentUri;

pub const NAME: &str = "memberLookup";

pub struct MemberLookupExtension {
    type_id: BuiltinTypeId,
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    uri: DocumentUri,
    line: u32,
    column: u32,
}

impl MemberLookupExtension {
    /// The `typeid` property is required and must name a known built-in type
    /// enumerator; anything else fails creation immediately.
    pub fn new(properties: &Map<String, Value>) -> Result<Self> {
        let Some(raw) = properties.get("typeid").and_then(Value::as_str) else {
            return Err(ServerError::ExtensionLoad {
                message: format!("{NAME} requires a \"typeid\" property"),
            });
        };
        let Some(type_id) = BuiltinTypeId::from_name(raw) else {
            return Err(ServerError::ExtensionLoad {
                message: format!("typeid {raw:?} does not name a builtin type"),
            });
        };
        Ok(Self { type_id })
    }
}

#[async_trait]
impl Extension for MemberLookupExtension {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_command(
        &mut self,
        event: &CommandEvent,
        ctx: &ExtensionContext,
    ) -> Result<Option<Map<String, Value>>> {
        if event.command != self.type_id.name() {
            return Ok(None);
        }
        // No arguments means no result, not an error.
        let Some(argument) = event.arguments.first() else {
            return Ok(None);
        };
        let params: LookupParams =
            serde_json::from_value(argument.clone()).map_err(|e| ServerError::InvalidParams {
                message: e.to_string(),
            })?;

        let members = ctx
            .analysis
            .members_at(&params.uri, params.line, params.column)?;
        let names: Vec<Value> = members
            .into_iter()
            .filter(|member| member.kind == MemberKind::Constant && member.type_id == self.type_id)
            .map(|member| Value::String(member.name))
            .collect();

        let mut result = Map::new();
        result.insert("names".into(), Value::Array(names));
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Member, StaticAnalysis};
    use crate::extension::test_context;
    use serde_json::json;
    use std::sync::Arc;

    fn properties(typeid: &str) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("typeid".into(), Value::String(typeid.into()));
        properties
    }

    fn analysis_with_members(uri: &DocumentUri) -> Arc<StaticAnalysis> {
        let mut analysis = StaticAnalysis::new();
        analysis.insert(
            uri,
            vec![
                Member {
                    name: "MAX_RETRIES".into(),
                    kind: MemberKind::Constant,
                    type_id: BuiltinTypeId::Int,
                },
                Member {
                    name: "GREETING".into(),
                    kind: MemberKind::Constant,
                    type_id: BuiltinTypeId::Str,
                },
                Member {
                    name: "counter".into(),
                    kind: MemberKind::Variable,
                    type_id: BuiltinTypeId::Int,
                },
                Member {
                    name: "TIMEOUT".into(),
                    kind: MemberKind::Constant,
                    type_id: BuiltinTypeId::Int,
                },
            ],
        );
        Arc::new(analysis)
    }

    #[test]
    fn test_missing_or_invalid_typeid_fails_creation() {
        assert!(MemberLookupExtension::new(&Map::new()).is_err());
        assert!(MemberLookupExtension::new(&properties("Widget")).is_err());
        assert!(MemberLookupExtension::new(&properties("Int")).is_ok());
    }

    #[tokio::test]
    async fn test_returns_constants_of_configured_type_in_order() {
        let uri = DocumentUri::parse("file:///proj/app.py").unwrap();
        let ctx = test_context(analysis_with_members(&uri), None);
        let mut ext = MemberLookupExtension::new(&properties("Int")).unwrap();

        let event = CommandEvent {
            command: "Int".into(),
            arguments: vec![json!({"uri": "file:///proj/app.py", "line": 3, "column": 1})],
        };
        let result = ext.on_command(&event, &ctx).await.unwrap().unwrap();
        assert_eq!(result["names"], json!(["MAX_RETRIES", "TIMEOUT"]));
    }

    #[tokio::test]
    async fn test_no_arguments_yields_no_result() {
        let uri = DocumentUri::parse("file:///proj/app.py").unwrap();
        let ctx = test_context(analysis_with_members(&uri), None);
        let mut ext = MemberLookupExtension::new(&properties("Int")).unwrap();

        let event = CommandEvent {
            command: "Int".into(),
            arguments: vec![],
        };
        assert!(ext.on_command(&event, &ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ignores_commands_for_other_names() {
        let uri = DocumentUri::parse("file:///proj/app.py").unwrap();
        let ctx = test_context(analysis_with_members(&uri), None);
        let mut ext = MemberLookupExtension::new(&properties("Int")).unwrap();

        let event = CommandEvent {
            command: "Str".into(),
            arguments: vec![json!({"uri": "file:///proj/app.py", "line": 1, "column": 1})],
        };
        assert!(ext.on_command(&event, &ctx).await.unwrap().is_none());
    }
}
