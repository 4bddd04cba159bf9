//! Submission front ends and the deduplicating `create`

use super::Dispatcher;
use crate::db::NewTask;
use crate::dedup::Verdict;
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{AcceptedTask, Event, RejectedTask, SubmissionKind, SubmissionReport};
use std::sync::atomic::Ordering;

impl Dispatcher {
    /// Store `candidate` unless its driver considers it a duplicate
    ///
    /// `candidate.driver` may be a bare driver name or a `namespace:name` identifier; the
    /// stored record always carries the qualified identifier.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownDriver`] when the driver is foreign or not registered
    /// - [`Error::Duplicate`] when the deduplicator rejects the candidate
    /// - [`Error::ShuttingDown`] once shutdown has started
    pub async fn create(&self, candidate: NewTask, kind: SubmissionKind) -> Result<AcceptedTask> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let driver = self.registry.lookup(&candidate.driver).await?;
        let candidate = NewTask {
            driver: driver.id.clone(),
            ..candidate
        };

        // Held until the insert so a concurrent identical submission sees this record
        let intake = self.intake_lock.lock().await;

        if let Verdict::Rejected(reason) = self.dedup.accept(&candidate, &driver, kind).await? {
            tracing::info!(
                driver = %candidate.driver,
                content = %candidate.content,
                "Submission rejected as duplicate"
            );
            self.emit(Event::DuplicateRejected {
                content: candidate.content.clone(),
                driver: candidate.driver.clone(),
                reason: reason.clone(),
            });
            return Err(Error::Duplicate(reason));
        }

        let id = with_retry(&self.config.retry, "insert task", || {
            self.db.insert_task(&candidate)
        })
        .await?;
        drop(intake);

        tracing::info!(
            id = %id,
            uid = ?candidate.uid,
            driver = %candidate.driver,
            content = %candidate.content,
            "Task created"
        );
        self.emit(Event::TaskCreated {
            id,
            uid: candidate.uid.clone(),
            content: candidate.content.clone(),
            driver: candidate.driver.clone(),
        });

        Ok(AcceptedTask {
            id,
            uid: candidate.uid,
            content: candidate.content,
            driver: candidate.driver,
        })
    }

    /// Submit one URL to every driver whose routing rule matches it
    ///
    /// Each matched driver gets its own record with a fresh uid. A URL matching no rule
    /// is reported as rejected rather than failing the call.
    pub async fn submit_single(&self, url: &str) -> Result<SubmissionReport> {
        let mut report = SubmissionReport::default();
        self.submit_routed(url, None, &mut report).await?;
        Ok(report)
    }

    /// Submit many URLs, each routed like [`Dispatcher::submit_single`], sharing an
    /// optional `download_dir`
    pub async fn submit_bulk(
        &self,
        urls: &[String],
        download_dir: Option<&str>,
    ) -> Result<SubmissionReport> {
        let mut report = SubmissionReport::default();
        for url in urls {
            self.submit_routed(url, download_dir, &mut report).await?;
        }
        tracing::info!(
            urls = urls.len(),
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Bulk submission processed"
        );
        Ok(report)
    }

    /// Submit a URL to an explicitly named driver
    ///
    /// Deduplication compares against every record of that driver, including
    /// `extra_content`.
    pub async fn submit_special(
        &self,
        url: &str,
        driver: &str,
        extra_content: Option<&str>,
        download_dir: Option<&str>,
    ) -> Result<AcceptedTask> {
        let mut candidate = NewTask::new(url, driver).with_uid(new_uid());
        if let Some(extra) = extra_content {
            candidate = candidate.with_extra_content(extra);
        }
        if let Some(dir) = download_dir {
            candidate = candidate.with_download_dir(dir);
        }
        self.create(candidate, SubmissionKind::Special).await
    }

    /// Driver names whose routing rule matches `url`, in rule order without repeats
    pub fn route(&self, url: &str) -> Vec<String> {
        let mut drivers: Vec<String> = Vec::new();
        for route in self.routes.iter() {
            if route.pattern.is_match(url) && !drivers.contains(&route.driver) {
                drivers.push(route.driver.clone());
            }
        }
        drivers
    }

    async fn submit_routed(
        &self,
        url: &str,
        download_dir: Option<&str>,
        report: &mut SubmissionReport,
    ) -> Result<()> {
        let drivers = self.route(url);
        if drivers.is_empty() {
            tracing::warn!(url, "No routing rule matches submission");
            report.rejected.push(RejectedTask {
                content: url.to_string(),
                driver: None,
                reason: "no routing rule matches".into(),
            });
            return Ok(());
        }

        for driver in drivers {
            let mut candidate = NewTask::new(url, driver.as_str()).with_uid(new_uid());
            if let Some(dir) = download_dir {
                candidate = candidate.with_download_dir(dir);
            }

            match self.create(candidate, SubmissionKind::Regular).await {
                Ok(accepted) => report.accepted.push(accepted),
                Err(Error::Duplicate(reason)) => report.rejected.push(RejectedTask {
                    content: url.to_string(),
                    driver: Some(self.registry.qualify(&driver)),
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn new_uid() -> String {
    uuid::Uuid::new_v4().to_string()
}
