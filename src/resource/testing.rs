//! Counting launcher and display for tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::{DisplaySubsystem, ResourceLauncher};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Launcher recording start/stop calls in a shared log
#[derive(Default)]
pub(crate) struct CountingLauncher {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub fail_start: AtomicBool,
    /// Never finish `start`, as a launcher hanging on a slow browser would
    pub stall_start: AtomicBool,
    pub displays: Mutex<Vec<Option<String>>>,
    pub log: Option<std::sync::Arc<Mutex<Vec<&'static str>>>>,
}

impl CountingLauncher {
    pub fn with_log(log: std::sync::Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            log: Some(log),
            ..Default::default()
        }
    }

    fn note(&self, entry: &'static str) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(entry);
        }
    }
}

#[async_trait]
impl ResourceLauncher for CountingLauncher {
    async fn start(&self, display: Option<&str>) -> Result<Option<String>> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Resource("launcher refused to start".into()));
        }
        if self.stall_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.displays.lock().unwrap().push(display.map(str::to_string));
        self.note("launcher.start");
        Ok(Some("ws://127.0.0.1:9222".into()))
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.note("launcher.stop");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

/// Display recording start/stop calls in a shared log
#[derive(Default)]
pub(crate) struct CountingDisplay {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub log: Option<std::sync::Arc<Mutex<Vec<&'static str>>>>,
}

impl CountingDisplay {
    pub fn with_log(log: std::sync::Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self {
            log: Some(log),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DisplaySubsystem for CountingDisplay {
    async fn start(&self) -> Result<String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("display.start");
        }
        Ok(":99".into())
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push("display.stop");
        }
        Ok(())
    }
}
