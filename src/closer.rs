use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::future::{BoxFuture, FutureExt},
    tokio::sync::Mutex,
    Build, Rocket,
};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::model::{
    common::election::{ElectionId, ElectionStatus},
    db::Election,
};
use crate::scheduled_task::ScheduledTask;
use crate::store::ElectionFilter;

/// How long to wait before retrying a closer that failed.
const RETRY_INTERVAL_MINUTES: i64 = 5;

type TaskMap = HashMap<ElectionId, ScheduledTask<Result<()>>>;

/// Scheduled tasks that close elections when their voting window ends, so
/// the stored status catches up with what voters already see.
#[derive(Clone, Default)]
pub struct ElectionClosers {
    tasks: Arc<Mutex<TaskMap>>,
}

impl ElectionClosers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_closer(&self, id: ElectionId) -> bool {
        self.tasks.lock().await.contains_key(&id)
    }

    /// Schedule a closer for every published or paused election with a
    /// scheduled end.
    pub async fn schedule_elections(&self, engine: &Engine) -> Result<()> {
        let filter = ElectionFilter {
            statuses: Some(vec![ElectionStatus::Published, ElectionStatus::Paused]),
            include_hidden: true,
            ..ElectionFilter::default()
        };
        let elections = engine.store().elections(&filter).await?;
        for election in &elections {
            self.schedule_election(engine, election).await;
        }
        Ok(())
    }

    /// Schedule (or reschedule) the closer of an election. Elections without
    /// a scheduled end never close by themselves.
    pub async fn schedule_election(&self, engine: &Engine, election: &Election) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.remove(&election.id) {
            if task.cancel().await {
                trace!("Closer of election {} had already finished", election.id);
            }
        }
        if let Some(end) = election.scheduled_end {
            let closer = Self::closer(engine.clone(), election.id, self.tasks.clone());
            let task = ScheduledTask::new(closer, end, engine.clock().now());
            tasks.insert(election.id, task);
            debug!("Election {} will close at {end}", election.id);
        }
    }

    pub async fn cancel(&self, id: ElectionId) {
        let task = self.tasks.lock().await.remove(&id);
        if let Some(task) = task {
            task.cancel().await;
            debug!("Cancelled closer of election {id}");
        }
    }

    /// Run the closer of an election now rather than at its scheduled time.
    /// Does nothing if there is none.
    pub async fn close_now(&self, id: ElectionId) -> Result<()> {
        // The closer takes the lock itself when it finishes.
        let task = self.tasks.lock().await.remove(&id);
        match task {
            Some(task) => {
                task.trigger_now();
                task.await.unwrap_or_else(|err| {
                    Err(Error::Internal(format!(
                        "Closer of election {id} did not complete: {err}"
                    )))
                })
            }
            None => Ok(()),
        }
    }

    /// Boxed, as a failed closer schedules a copy of itself.
    fn closer(
        engine: Engine,
        id: ElectionId,
        tasks: Arc<Mutex<TaskMap>>,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            match engine.auto_close(id).await {
                Ok(closed) => {
                    tasks.lock().await.remove(&id);
                    if !closed {
                        debug!("Closer of election {id} found nothing to do");
                    }
                    Ok(())
                }
                Err(err) => {
                    error!("Failed to close election {id}: {err}");
                    let now = engine.clock().now();
                    let retry_at = now + Duration::minutes(RETRY_INTERVAL_MINUTES);
                    let retry = Self::closer(engine.clone(), id, tasks.clone());
                    tasks
                        .lock()
                        .await
                        .insert(id, ScheduledTask::new(retry, retry_at, now));
                    warn!("Closer of election {id} will retry in {RETRY_INTERVAL_MINUTES} minutes");
                    Err(err)
                }
            }
        }
        .boxed()
    }
}

/// Schedules closers for all running elections at ignition. Needs the
/// [`Engine`] in managed state, so attach it after the database fairing.
pub struct ElectionCloserFairing;

#[rocket::async_trait]
impl Fairing for ElectionCloserFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election closers",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let engine = match rocket.state::<Engine>() {
            Some(engine) => engine.clone(),
            None => {
                error!("Engine was not available when scheduling election closers");
                return Err(rocket);
            }
        };
        if let Err(err) = engine.closers().schedule_elections(&engine).await {
            error!("Failed to schedule election closers: {err}");
            return Err(rocket);
        }
        info!("Election closers scheduled");
        Ok(rocket)
    }
}
