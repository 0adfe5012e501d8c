use crate::coordinator::{Coordinator, Snapshot};
use crate::costs::TariffConfig;
use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Refresh,
    UpdateTariff(TariffConfig),
    ClearDailyCache,
}

/// Drives a coordinator from its own task: one cycle at a time, on a timer
/// or on request.
pub struct Scheduler {
    coordinator: Coordinator,
    timezone: Tz,
    last_cycle_date: Option<NaiveDate>,
}

/// Host-side handle to a spawned scheduler. Dropping it stops the task.
pub struct CoordinatorHandle {
    commands: Sender<Command>,
    snapshots: watch::Receiver<Option<Arc<Snapshot>>>,
    task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(coordinator: Coordinator, timezone: Tz) -> Self {
        Self {
            coordinator,
            timezone,
            last_cycle_date: None,
        }
    }

    pub fn spawn(coordinator: Coordinator, period: Duration, timezone: Tz) -> CoordinatorHandle {
        let (commands, receiver) = mpsc::channel(16);
        let snapshots = coordinator.subscribe();
        let mut scheduler = Self::new(coordinator, timezone);
        // The caller has normally just run the first refresh itself
        scheduler.last_cycle_date = Some(scheduler.local_date(Utc::now()));

        let task = tokio::spawn(async move {
            scheduler.run(period, receiver).await;
        });
        CoordinatorHandle {
            commands,
            snapshots,
            task,
        }
    }

    async fn run(mut self, period: Duration, mut commands: Receiver<Command>) {
        info!("Scheduler started, refreshing every {}s", period.as_secs());
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.refresh().await,
                    Some(Command::UpdateTariff(tariff)) => {
                        self.coordinator.update_tariff_config(tariff);
                        self.refresh().await;
                    }
                    Some(Command::ClearDailyCache) => self.coordinator.clear_daily_cache(),
                    None => break,
                },
            }
        }
        info!("Scheduler exiting");
    }

    /// Runs one cycle, starting a new metering day first if the date moved on.
    async fn refresh(&mut self) {
        self.roll_over_day(Utc::now());
        if let Err(e) = self.coordinator.refresh().await {
            warn!("Update failed, keeping previous snapshot: {e}");
        }
    }

    /// Clears the daily cache when `now` falls on a later local day than the
    /// previous cycle. Returns whether it did.
    fn roll_over_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = self.local_date(now);
        let rolled = self.last_cycle_date.is_some_and(|last| last != today);
        if rolled {
            info!("New metering day {today}, clearing cached readings");
            self.coordinator.clear_daily_cache();
        }
        self.last_cycle_date = Some(today);
        rolled
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }
}

impl CoordinatorHandle {
    /// Queues a refresh outside the regular interval.
    pub async fn request_refresh(&self) -> anyhow::Result<()> {
        self.send(Command::Refresh).await
    }

    /// Swaps the tariff and refreshes so costs reflect it straight away.
    pub async fn update_tariff_config(&self, tariff: TariffConfig) -> anyhow::Result<()> {
        self.send(Command::UpdateTariff(tariff)).await
    }

    pub async fn clear_daily_cache(&self) -> anyhow::Result<()> {
        self.send(Command::ClearDailyCache).await
    }

    async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("Scheduler is no longer running"))
    }

    pub fn snapshots(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshots.borrow().clone()
    }

    /// Stops the scheduler after any queued commands have run.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!("Scheduler task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glowmarkt::GlowmarktClient;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn scheduler() -> Scheduler {
        let client = GlowmarktClient::new("user@example.com", "hunter2");
        let coordinator = Coordinator::new(client, TariffConfig::default());
        Scheduler::new(coordinator, chrono_tz::Europe::London)
    }

    #[test]
    fn test_first_cycle_does_not_roll_over() {
        let mut scheduler = scheduler();
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        assert!(!scheduler.roll_over_day(now));
        assert!(!scheduler.roll_over_day(now + chrono::TimeDelta::hours(5)));
    }

    #[test]
    fn test_rolls_over_at_local_midnight() {
        let mut scheduler = scheduler();
        // 22:55 UTC is 23:55 in London during BST
        assert!(!scheduler.roll_over_day(Utc.with_ymd_and_hms(2024, 7, 1, 22, 55, 0).unwrap()));
        assert!(scheduler.roll_over_day(Utc.with_ymd_and_hms(2024, 7, 1, 23, 0, 0).unwrap()));
        assert!(!scheduler.roll_over_day(Utc.with_ymd_and_hms(2024, 7, 2, 0, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_requested_refresh_rolls_over_day() {
        let mut server = mockito::Server::new_async().await;
        let _auth = server
            .mock("POST", "/auth")
            .with_status(200)
            .with_body(r#"{"valid": true, "token": "test_token"}"#)
            .create_async()
            .await;
        let _entities = server
            .mock("GET", "/virtualentity")
            .with_status(200)
            .with_body(r#"[{"veId": "ve-home"}]"#)
            .create_async()
            .await;
        let _resources = server
            .mock("GET", "/virtualentity/ve-home/resources")
            .with_status(200)
            .with_body(r#"{"resources": [{"resourceId": "r-elec", "classifier": "electricity.consumption"}]}"#)
            .create_async()
            .await;
        let readings = server
            .mock("GET", "/resource/r-elec/readings")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status": "OK", "data": [[1719788400, 10.0]]}"#)
            .create_async()
            .await;

        let client =
            GlowmarktClient::new("user@example.com", "hunter2").with_base_url(&server.url());
        let coordinator = Coordinator::new(client, TariffConfig::default());
        let mut scheduler = Scheduler::new(coordinator, chrono_tz::UTC);
        scheduler.refresh().await;
        let today = scheduler.local_date(Utc::now());
        assert_eq!(scheduler.last_cycle_date, Some(today));

        readings.remove_async().await;
        let _outage = server
            .mock("GET", "/resource/r-elec/readings")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        // Same day: the gap is masked by the cached value
        scheduler.refresh().await;
        let masked = scheduler.coordinator.snapshot().unwrap();
        assert_eq!(masked.readings["electricity.consumption"], Some(10.0));

        // A command-driven cycle after midnight starts the day from scratch
        scheduler.last_cycle_date = Some(today - chrono::TimeDelta::days(1));
        scheduler.refresh().await;
        let fresh_day = scheduler.coordinator.snapshot().unwrap();
        assert_eq!(fresh_day.readings["electricity.consumption"], None);
        assert_eq!(scheduler.last_cycle_date, Some(scheduler.local_date(Utc::now())));
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_scheduler() {
        let client = GlowmarktClient::new("user@example.com", "hunter2")
            .with_base_url("http://127.0.0.1:1");
        let coordinator = Coordinator::new(client, TariffConfig::default());
        let mut handle = Scheduler::spawn(coordinator, Duration::from_secs(3600), chrono_tz::UTC);
        assert!(handle.latest().is_none());

        handle.task.abort();
        let _ = (&mut handle.task).await;
        assert!(handle.request_refresh().await.is_err());
    }
}
