//! Canvas resources used by the migration

use serde::{Deserialize, Serialize};

use super::constants::EXTERNAL_TOOL_TAB_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrollmentTerm {
    pub id: u64,
    pub name: String,
}

/// LTI tool installed in an account (or inherited from a parent account)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalTool {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub account_id: u64,
    pub enrollment_term_id: u64,
}

/// Course navigation tab as returned by `GET /courses/:id/tabs`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tab {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub position: Option<u32>,
}

impl Tab {
    /// Tool id encoded in an external tab's id, e.g. `context_external_tool_37063`
    pub fn tool_id(&self) -> Option<u64> {
        if self.kind != "external" {
            return None;
        }
        self.id
            .strip_prefix(EXTERNAL_TOOL_TAB_PREFIX)
            .and_then(|id| id.parse().ok())
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden.unwrap_or(false)
    }
}

/// A tool's navigation placement within one course
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPlacement {
    pub course_id: u64,
    pub tool_id: u64,
    pub tab_id: String,
    pub label: String,
    pub hidden: bool,
    pub position: Option<u32>,
}

impl ToolPlacement {
    pub fn from_tab(course_id: u64, tab: &Tab) -> Option<Self> {
        let tool_id = tab.tool_id()?;
        Some(Self {
            course_id,
            tool_id,
            tab_id: tab.id.clone(),
            label: tab.label.clone(),
            hidden: tab.is_hidden(),
            position: tab.position,
        })
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden
    }

    /// Placements for every external tool tab, other tabs dropped
    pub fn from_tabs(course_id: u64, tabs: &[Tab]) -> Vec<Self> {
        tabs.iter()
            .filter_map(|tab| Self::from_tab(course_id, tab))
            .collect()
    }

    pub fn find(placements: &[ToolPlacement], tool_id: u64) -> Option<&ToolPlacement> {
        placements.iter().find(|p| p.tool_id == tool_id)
    }
}

/// Body of a tab update, sent as query parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabUpdate {
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl TabUpdate {
    pub fn hide() -> Self {
        Self {
            hidden: true,
            position: None,
        }
    }

    pub fn show(position: Option<u32>) -> Self {
        Self {
            hidden: false,
            position,
        }
    }
}
