//! Analysis-session seam
//!
//! The language-analysis engine is an external collaborator. The transport
//! core only needs to enumerate the members visible at a source location, so
//! that is the whole contract here. `StaticAnalysis` is the in-memory
//! implementation used for wiring and tests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::uri::DocumentUri;

/// Built-in Python type identifiers recognized by extension configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTypeId {
    Unknown,
    Object,
    Type,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    Tuple,
    List,
    Dict,
    Set,
    Function,
    Generator,
    Module,
    NoneType,
}

impl BuiltinTypeId {
    /// Parse an enumerator name. Exact match only.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Unknown" => Some(Self::Unknown),
            "Object" => Some(Self::Object),
            "Type" => Some(Self::Type),
            "Bool" => Some(Self::Bool),
            "Int" => Some(Self::Int),
            "Float" => Some(Self::Float),
            "Complex" => Some(Self::Complex),
            "Str" => Some(Self::Str),
            "Bytes" => Some(Self::Bytes),
            "Tuple" => Some(Self::Tuple),
            "List" => Some(Self::List),
            "Dict" => Some(Self::Dict),
            "Set" => Some(Self::Set),
            "Function" => Some(Self::Function),
            "Generator" => Some(Self::Generator),
            "Module" => Some(Self::Module),
            "NoneType" => Some(Self::NoneType),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Object => "Object",
            Self::Type => "Type",
            Self::Bool => "Bool",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Complex => "Complex",
            Self::Str => "Str",
            Self::Bytes => "Bytes",
            Self::Tuple => "Tuple",
            Self::List => "List",
            Self::Dict => "Dict",
            Self::Set => "Set",
            Self::Function => "Function",
            Self::Generator => "Generator",
            Self::Module => "Module",
            Self::NoneType => "NoneType",
        }
    }
}

/// Declared kind of a visible member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Constant,
    Variable,
    Function,
    Class,
    Module,
}

/// One member visible at a source location.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub kind: MemberKind,
    pub type_id: BuiltinTypeId,
}

/// Stable interface to the analysis engine.
pub trait AnalysisSession: Send + Sync {
    /// Members visible at the given document position.
    fn members_at(&self, document: &DocumentUri, line: u32, column: u32) -> Result<Vec<Member>>;
}

/// Location-insensitive in-memory analysis, keyed by document.
#[derive(Default)]
pub struct StaticAnalysis {
    members: HashMap<String, Vec<Member>>,
}

impl StaticAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document: &DocumentUri, members: Vec<Member>) {
        self.members.insert(document.as_url().to_string(), members);
    }
}

impl AnalysisSession for StaticAnalysis {
    fn members_at(&self, document: &DocumentUri, _line: u32, _column: u32) -> Result<Vec<Member>> {
        Ok(self
            .members
            .get(&document.as_url().to_string())
            .cloned()
            .unwrap_or_default())
    }
}
