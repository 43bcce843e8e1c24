//! Course enumeration strategies
//!
//! The warehouse strategy is preferred when configured and reachable; the API
//! strategy pages through Canvas otherwise. The choice is made once, by
//! [`select_enumerator`].

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::api::{CanvasApi, Course};
use crate::config::{MigrationConfig, WarehouseSettings};
use crate::error::MigrationError;
use crate::warehouse::Warehouse;

pub type CourseStream<'a> = BoxStream<'a, Result<Course, MigrationError>>;

/// Lazily produces the courses in scope for a run
pub trait CourseEnumerator: Send + Sync {
    /// Short name for logs
    fn source(&self) -> &'static str;

    fn courses(&self) -> CourseStream<'_>;
}

/// Split `limit` across `parts` as evenly as possible, earlier parts take the remainder
pub fn split_limit(limit: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    let base = limit / parts;
    let remainder = limit % parts;
    (0..parts)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// Pages through `GET /accounts/:id/courses` once per term
pub struct ApiEnumerator {
    api: Arc<dyn CanvasApi>,
    account_id: u64,
    term_ids: Vec<u64>,
    term_limits: Option<Vec<usize>>,
}

impl ApiEnumerator {
    pub fn new(api: Arc<dyn CanvasApi>, config: &MigrationConfig) -> Self {
        let term_ids: Vec<u64> = config.term_ids.iter().copied().collect();
        let term_limits = config
            .course_limit
            .map(|limit| split_limit(limit, term_ids.len()));
        Self {
            api,
            account_id: config.account_id,
            term_ids,
            term_limits,
        }
    }
}

struct PageState {
    api: Arc<dyn CanvasApi>,
    account_id: u64,
    term_ids: Vec<u64>,
    term_limits: Option<Vec<usize>>,
    term_index: usize,
    /// Next page URL for the current term; `None` before its first page
    cursor: Option<String>,
    term_started: bool,
    term_emitted: usize,
    buffer: VecDeque<Course>,
    seen: HashSet<u64>,
    finished: bool,
}

impl PageState {
    fn term_limit(&self) -> Option<usize> {
        self.term_limits
            .as_ref()
            .and_then(|limits| limits.get(self.term_index).copied())
    }

    fn advance_term(&mut self) {
        self.term_index += 1;
        self.cursor = None;
        self.term_started = false;
        self.term_emitted = 0;
    }

    /// Next course, fetching pages as needed; `None` once every term is exhausted
    async fn next_course(&mut self) -> Option<Result<Course, MigrationError>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(course) = self.buffer.pop_front() {
                self.term_emitted += 1;
                return Some(Ok(course));
            }

            let Some(&term_id) = self.term_ids.get(self.term_index) else {
                self.finished = true;
                return None;
            };

            let term_full = self
                .term_limit()
                .is_some_and(|limit| self.term_emitted >= limit);
            if term_full || (self.term_started && self.cursor.is_none()) {
                debug!("Term {}: {} courses", term_id, self.term_emitted);
                self.advance_term();
                continue;
            }

            let page = match self
                .api
                .list_courses_page(self.account_id, term_id, self.cursor.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(MigrationError::from_enumeration(e)));
                }
            };

            self.term_started = true;
            self.cursor = page.next;

            let room = self
                .term_limit()
                .map(|limit| limit.saturating_sub(self.term_emitted))
                .unwrap_or(usize::MAX);
            let mut taken = 0;
            for course in page.items {
                if taken >= room {
                    break;
                }
                // Server-side filtering is by term; guard against other terms and repeats
                if course.enrollment_term_id != term_id || !self.seen.insert(course.id) {
                    continue;
                }
                self.buffer.push_back(course);
                taken += 1;
            }
        }
    }
}

impl CourseEnumerator for ApiEnumerator {
    fn source(&self) -> &'static str {
        "canvas api"
    }

    fn courses(&self) -> CourseStream<'_> {
        let state = PageState {
            api: self.api.clone(),
            account_id: self.account_id,
            term_ids: self.term_ids.clone(),
            term_limits: self.term_limits.clone(),
            term_index: 0,
            cursor: None,
            term_started: false,
            term_emitted: 0,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_course().await?;
            Some((item, state))
        })
        .boxed()
    }
}

/// Bulk enumeration from the warehouse
pub struct WarehouseEnumerator {
    warehouse: Warehouse,
    config: MigrationConfig,
}

impl WarehouseEnumerator {
    pub fn new(warehouse: Warehouse, config: &MigrationConfig) -> Self {
        Self {
            warehouse,
            config: config.clone(),
        }
    }
}

impl CourseEnumerator for WarehouseEnumerator {
    fn source(&self) -> &'static str {
        "warehouse"
    }

    fn courses(&self) -> CourseStream<'_> {
        self.warehouse.courses_in_terms(&self.config)
    }
}

/// Opens the warehouse-backed enumerator
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    async fn connect(
        &self,
        settings: &WarehouseSettings,
        config: &MigrationConfig,
    ) -> Result<Box<dyn CourseEnumerator>, MigrationError>;
}

pub struct PostgresConnector;

#[async_trait]
impl WarehouseConnector for PostgresConnector {
    async fn connect(
        &self,
        settings: &WarehouseSettings,
        config: &MigrationConfig,
    ) -> Result<Box<dyn CourseEnumerator>, MigrationError> {
        let warehouse = Warehouse::connect(settings).await?;
        Ok(Box::new(WarehouseEnumerator::new(warehouse, config)))
    }
}

/// Pick the enumeration strategy for this run.
///
/// A disabled warehouse is never contacted. An unreachable one is logged and
/// replaced by the API strategy.
pub async fn select_enumerator(
    config: &MigrationConfig,
    warehouse: Option<&WarehouseSettings>,
    connector: &dyn WarehouseConnector,
    api: Arc<dyn CanvasApi>,
) -> Box<dyn CourseEnumerator> {
    match warehouse {
        Some(settings) if config.warehouse_enabled => match connector.connect(settings, config).await {
            Ok(enumerator) => {
                info!("Enumerating courses from the warehouse");
                return enumerator;
            }
            Err(e) => {
                warn!("{}; falling back to the Canvas API for course enumeration", e);
            }
        },
        _ => info!("Warehouse disabled; enumerating courses through the Canvas API"),
    }

    Box::new(ApiEnumerator::new(api, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::testing::{FakeCanvas, test_config};
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn course(id: u64, term: u64) -> Course {
        Course {
            id,
            name: format!("Course {}", id),
            account_id: 1,
            enrollment_term_id: term,
        }
    }

    #[test]
    fn test_split_limit() {
        assert_eq!(split_limit(10, 3), vec![4, 3, 3]);
        assert_eq!(split_limit(2, 4), vec![1, 1, 0, 0]);
        assert!(split_limit(5, 0).is_empty());
    }

    #[tokio::test]
    async fn test_api_enumerator_pages_through_terms() {
        let canvas = FakeCanvas::new().with_page_size(2);
        for id in 1..=5 {
            canvas.add_course(course(id, 164), vec![]);
        }
        canvas.add_course(course(6, 165), vec![]);

        let mut config = test_config();
        config.term_ids = [164, 165].into_iter().collect();
        let enumerator = ApiEnumerator::new(Arc::new(canvas.clone()), &config);

        let courses: Vec<Course> = enumerator.courses().try_collect().await.unwrap();
        assert_eq!(
            courses.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );
        // 3 pages for term 164, 1 for term 165
        assert_eq!(canvas.course_page_requests(), 4);
    }

    #[tokio::test]
    async fn test_api_enumerator_respects_limit_per_term() {
        let canvas = FakeCanvas::new().with_page_size(2);
        for id in 1..=5 {
            canvas.add_course(course(id, 164), vec![]);
        }
        for id in 6..=8 {
            canvas.add_course(course(id, 165), vec![]);
        }

        let mut config = test_config();
        config.term_ids = [164, 165].into_iter().collect();
        config.course_limit = Some(3);
        let enumerator = ApiEnumerator::new(Arc::new(canvas.clone()), &config);

        let courses: Vec<Course> = enumerator.courses().try_collect().await.unwrap();
        assert_eq!(courses.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2, 6]);
    }

    #[tokio::test]
    async fn test_api_enumerator_reports_exhausted_retries() {
        let canvas = FakeCanvas::new();
        canvas.add_course(course(1, 164), vec![]);
        canvas.fail_course_listing(503);

        let enumerator = ApiEnumerator::new(Arc::new(canvas), &test_config());
        let results: Vec<_> = enumerator.courses().collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(MigrationError::ApiExhausted(_))));
    }

    struct CountingConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WarehouseConnector for CountingConnector {
        async fn connect(
            &self,
            settings: &WarehouseSettings,
            _config: &MigrationConfig,
        ) -> Result<Box<dyn CourseEnumerator>, MigrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(MigrationError::WarehouseUnavailable(format!(
                "{}: connection refused",
                settings.host
            )))
        }
    }

    fn warehouse_settings() -> WarehouseSettings {
        WarehouseSettings {
            host: "udw.test".into(),
            port: 5432,
            name: "udw".into(),
            user: "reader".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn test_disabled_warehouse_is_never_contacted() {
        let connector = CountingConnector {
            calls: AtomicUsize::new(0),
        };
        let config = test_config();
        assert!(!config.warehouse_enabled);

        let enumerator =
            select_enumerator(&config, None, &connector, Arc::new(FakeCanvas::new())).await;

        assert_eq!(enumerator.source(), "canvas api");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_warehouse_falls_back_to_api() {
        let connector = CountingConnector {
            calls: AtomicUsize::new(0),
        };
        let mut config = test_config();
        config.warehouse_enabled = true;
        let settings = warehouse_settings();

        let enumerator = select_enumerator(
            &config,
            Some(&settings),
            &connector,
            Arc::new(FakeCanvas::new()),
        )
        .await;

        assert_eq!(enumerator.source(), "canvas api");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }
}
