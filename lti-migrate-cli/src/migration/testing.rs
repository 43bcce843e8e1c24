//! In-memory Canvas used by the migration tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::api::constants::EXTERNAL_TOOL_TAB_PREFIX;
use crate::api::models::{Account, EnrollmentTerm, ExternalTool, Tab};
use crate::api::pagination::Page;
use crate::api::{ApiError, CanvasApi, Course, TabUpdate, ToolPlacement};
use crate::config::MigrationConfig;

pub const SOURCE_TOOL: u64 = 37063;
pub const TARGET_TOOL: u64 = 15593;

pub fn test_config() -> MigrationConfig {
    MigrationConfig {
        account_id: 1,
        term_ids: [164].into_iter().collect(),
        source_tool_id: SOURCE_TOOL,
        target_tool_id: TARGET_TOOL,
        warehouse_enabled: false,
        course_limit: None,
        max_workers: 2,
        dry_run: false,
        trust_records: false,
    }
}

pub fn tool_tab(tool_id: u64, hidden: bool, position: u32) -> Tab {
    Tab {
        id: format!("{}{}", EXTERNAL_TOOL_TAB_PREFIX, tool_id),
        label: format!("Tool {}", tool_id),
        kind: "external".to_string(),
        hidden: Some(hidden),
        position: Some(position),
    }
}

pub fn home_tab() -> Tab {
    Tab {
        id: "home".to_string(),
        label: "Home".to_string(),
        kind: "internal".to_string(),
        hidden: None,
        position: Some(1),
    }
}

pub fn course(id: u64) -> Course {
    Course {
        id,
        name: format!("Course {}", id),
        account_id: 1,
        enrollment_term_id: 164,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub course_id: u64,
    pub tab_id: String,
    pub update: TabUpdate,
}

#[derive(Default)]
struct State {
    page_size: usize,
    courses: BTreeMap<u64, Course>,
    tabs: HashMap<u64, Vec<Tab>>,
    tools: Vec<ExternalTool>,
    course_page_requests: usize,
    tab_reads: HashMap<u64, usize>,
    updates: Vec<RecordedUpdate>,
    listing_failure: Option<u16>,
    tab_failures: HashMap<u64, u16>,
    /// Queued failures per tab: status, and whether the update lands anyway
    update_failures: HashMap<(u64, String), VecDeque<(u16, bool)>>,
}

#[derive(Clone)]
pub struct FakeCanvas {
    state: Arc<Mutex<State>>,
}

impl FakeCanvas {
    pub fn new() -> Self {
        let state = State {
            page_size: 50,
            tools: vec![
                ExternalTool {
                    id: SOURCE_TOOL,
                    name: "Old Tool".into(),
                },
                ExternalTool {
                    id: TARGET_TOOL,
                    name: "New Tool".into(),
                },
            ],
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.lock().unwrap().page_size = page_size;
        self
    }

    pub fn with_tools(self, tools: &[u64]) -> Self {
        self.state.lock().unwrap().tools = tools
            .iter()
            .map(|&id| ExternalTool {
                id,
                name: format!("Tool {}", id),
            })
            .collect();
        self
    }

    pub fn add_course(&self, course: Course, tabs: Vec<Tab>) {
        let mut state = self.state.lock().unwrap();
        state.tabs.insert(course.id, tabs);
        state.courses.insert(course.id, course);
    }

    pub fn fail_course_listing(&self, status: u16) {
        self.state.lock().unwrap().listing_failure = Some(status);
    }

    pub fn fail_tab_listing(&self, course_id: u64, status: u16) {
        self.state.lock().unwrap().tab_failures.insert(course_id, status);
    }

    /// Next update of this tool's tab in the course answers with `status`
    pub fn fail_next_update(&self, course_id: u64, tool_id: u64, status: u16) {
        self.queue_update_failure(course_id, tool_id, status, false);
    }

    /// Next update of this tool's tab is applied, but the caller sees `status`
    pub fn lose_next_update_response(&self, course_id: u64, tool_id: u64, status: u16) {
        self.queue_update_failure(course_id, tool_id, status, true);
    }

    fn queue_update_failure(&self, course_id: u64, tool_id: u64, status: u16, applied: bool) {
        let tab_id = format!("{}{}", EXTERNAL_TOOL_TAB_PREFIX, tool_id);
        self.state
            .lock()
            .unwrap()
            .update_failures
            .entry((course_id, tab_id))
            .or_default()
            .push_back((status, applied));
    }

    pub fn course_page_requests(&self) -> usize {
        self.state.lock().unwrap().course_page_requests
    }

    pub fn tab_reads(&self, course_id: u64) -> usize {
        self.state
            .lock()
            .unwrap()
            .tab_reads
            .get(&course_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.state.lock().unwrap().updates.clone()
    }

    pub fn clear_updates(&self) {
        self.state.lock().unwrap().updates.clear();
    }

    pub fn placement(&self, course_id: u64, tool_id: u64) -> Option<ToolPlacement> {
        let state = self.state.lock().unwrap();
        let tabs = state.tabs.get(&course_id)?;
        ToolPlacement::find(&ToolPlacement::from_tabs(course_id, tabs), tool_id).cloned()
    }
}

#[async_trait]
impl CanvasApi for FakeCanvas {
    async fn get_account(&self, account_id: u64) -> Result<Account, ApiError> {
        Ok(Account {
            id: account_id,
            name: "Test Account".into(),
        })
    }

    async fn get_term(&self, _account_id: u64, term_id: u64) -> Result<EnrollmentTerm, ApiError> {
        Ok(EnrollmentTerm {
            id: term_id,
            name: format!("Term {}", term_id),
        })
    }

    async fn list_account_tools(&self, _account_id: u64) -> Result<Vec<ExternalTool>, ApiError> {
        Ok(self.state.lock().unwrap().tools.clone())
    }

    async fn list_courses_page(
        &self,
        account_id: u64,
        term_id: u64,
        cursor: Option<&str>,
    ) -> Result<Page<Course>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.course_page_requests += 1;
        let url = format!("/accounts/{}/courses", account_id);
        if let Some(status) = state.listing_failure {
            return Err(ApiError::status("GET", &url, status, "listing failed"));
        }

        let page: usize = cursor
            .and_then(|c| c.strip_prefix("page:"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(1);
        let matching: Vec<Course> = state
            .courses
            .values()
            .filter(|c| c.account_id == account_id && c.enrollment_term_id == term_id)
            .cloned()
            .collect();

        let size = state.page_size.max(1);
        let start = (page - 1) * size;
        let items: Vec<Course> = matching.iter().skip(start).take(size).cloned().collect();
        let next = (start + size < matching.len()).then(|| format!("page:{}", page + 1));
        Ok(Page { items, next })
    }

    async fn list_course_tabs(&self, course_id: u64) -> Result<Vec<Tab>, ApiError> {
        let mut state = self.state.lock().unwrap();
        *state.tab_reads.entry(course_id).or_default() += 1;
        let url = format!("/courses/{}/tabs", course_id);
        if let Some(&status) = state.tab_failures.get(&course_id) {
            return Err(ApiError::status("GET", &url, status, "tabs failed"));
        }
        state
            .tabs
            .get(&course_id)
            .cloned()
            .ok_or_else(|| ApiError::status("GET", &url, 404, "course not found"))
    }

    async fn update_course_tab(
        &self,
        course_id: u64,
        tab_id: &str,
        update: &TabUpdate,
    ) -> Result<Tab, ApiError> {
        let mut state = self.state.lock().unwrap();
        let url = format!("/courses/{}/tabs/{}", course_id, tab_id);
        state.updates.push(RecordedUpdate {
            course_id,
            tab_id: tab_id.to_string(),
            update: update.clone(),
        });

        let failure = state
            .update_failures
            .get_mut(&(course_id, tab_id.to_string()))
            .and_then(VecDeque::pop_front);
        if let Some((status, false)) = failure {
            return Err(ApiError::status("PUT", &url, status, "update failed"));
        }

        let tab = state
            .tabs
            .get_mut(&course_id)
            .and_then(|tabs| tabs.iter_mut().find(|t| t.id == tab_id))
            .ok_or_else(|| ApiError::status("PUT", &url, 404, "tab not found"))?;
        tab.hidden = Some(update.hidden);
        if let Some(position) = update.position {
            tab.position = Some(position);
        }
        match failure {
            Some((status, _)) => Err(ApiError::status("PUT", &url, status, "gateway timeout")),
            None => Ok(tab.clone()),
        }
    }
}
