use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::state::SharedState;

pub struct Scheduler {
    state: Arc<SharedState>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(state: Arc<SharedState>, config: SchedulerConfig) -> Self {
        Self {
            state,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        *self.running.write().await = true;
        info!("Starting background scheduler");

        let mut sched = JobScheduler::new().await?;

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);

        let newsletter_job = Job::new_async(
            self.config.newsletter_cron.as_str(),
            move |_uuid, _lock| {
                let state = Arc::clone(&state);
                let running = Arc::clone(&running);
                Box::pin(async move {
                    if !*running.read().await {
                        return;
                    }
                    match state.newsletter.run_once().await {
                        Ok(0) => {}
                        Ok(n) => info!("Newsletter job announced {} post(s)", n),
                        Err(e) => error!("Newsletter job failed: {}", e),
                    }
                })
            },
        )?;

        sched.add(newsletter_job).await?;
        sched.start().await?;

        info!(
            "Scheduler running with cron: {}",
            self.config.newsletter_cron
        );

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping scheduler...");
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Single newsletter pass, used by the `newsletter` CLI command.
    pub async fn run_once(&self) -> Result<usize> {
        self.state.newsletter.run_once().await
    }
}
