//! Recording fakes for the executor and SCM ports.

use async_trait::async_trait;
use slipway_core::ports::{
    BuildStartConfig, BuildStopConfig, CommitStatusConfig, Executor, PrCommentConfig, ScmAdapter,
    TimerConfig, TimerStopConfig,
};
use slipway_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ExecutorCall {
    Start(BuildStartConfig),
    Stop(BuildStopConfig),
    StopFrozen(BuildStopConfig),
    StartTimer(TimerConfig),
    StopTimer(TimerStopConfig),
}

#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecutorCall>>,
    fail_start: AtomicBool,
}

impl RecordingExecutor {
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.lock().await.clone()
    }

    pub async fn starts(&self) -> Vec<BuildStartConfig> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::Start(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn stops(&self) -> Vec<BuildStopConfig> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::Stop(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn frozen_stops(&self) -> Vec<BuildStopConfig> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::StopFrozen(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn timer_starts(&self) -> Vec<TimerConfig> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::StartTimer(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn timer_stops(&self) -> Vec<TimerStopConfig> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                ExecutorCall::StopTimer(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn start(&self, config: &BuildStartConfig) -> Result<()> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(Error::Executor("executor start failed".to_string()));
        }
        self.calls
            .lock()
            .await
            .push(ExecutorCall::Start(config.clone()));
        Ok(())
    }

    async fn stop(&self, config: &BuildStopConfig) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ExecutorCall::Stop(config.clone()));
        Ok(())
    }

    async fn stop_frozen(&self, config: &BuildStopConfig) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ExecutorCall::StopFrozen(config.clone()));
        Ok(())
    }

    async fn start_timer(&self, config: &TimerConfig) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ExecutorCall::StartTimer(config.clone()));
        Ok(())
    }

    async fn stop_timer(&self, config: &TimerStopConfig) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(ExecutorCall::StopTimer(config.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingScm {
    statuses: Mutex<Vec<CommitStatusConfig>>,
    comments: Mutex<Vec<PrCommentConfig>>,
    fail: AtomicBool,
}

impl RecordingScm {
    /// Make every SCM call fail until reset.
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub async fn statuses(&self) -> Vec<CommitStatusConfig> {
        self.statuses.lock().await.clone()
    }

    pub async fn comments(&self) -> Vec<PrCommentConfig> {
        self.comments.lock().await.clone()
    }
}

#[async_trait]
impl ScmAdapter for RecordingScm {
    async fn update_commit_status(&self, config: &CommitStatusConfig) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Scm("commit status failed".to_string()));
        }
        self.statuses.lock().await.push(config.clone());
        Ok(())
    }

    async fn add_pr_comment(&self, config: &PrCommentConfig) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Scm("pr comment failed".to_string()));
        }
        self.comments.lock().await.push(config.clone());
        Ok(())
    }
}
