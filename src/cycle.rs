//! The Cycle Engine (SPEC_FULL.md §4.6): once per cycle period, dequeue one
//! pending command (or a no-op), dispatch it, reconcile VCU states against
//! the latest pinger snapshots, gather and publish telemetry. Runs on a
//! `tokio::time::interval` rather than a blocking sleep so an overrunning
//! cycle never delays the next tick's deadline (SPEC_FULL.md §9): the next
//! tick simply fires as soon as the current cycle returns, with no backlog
//! of missed ticks queued up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::Command;
use crate::component::Component;
use crate::driver::CommandFault;
use crate::error::AppError;
use crate::log_writer::LogWriter;
use crate::queue::TelemetryQueue;
use crate::runtime::{Task, TaskFuture};
use crate::sink::TimeSeriesSink;
use crate::telemetry::bucket_by_timestamp;

pub const CYCLE_PERIOD: Duration = Duration::from_secs(1);

pub struct CycleEngine {
    tree: Component,
    commands: mpsc::UnboundedReceiver<Command>,
    telemetry_queue: Arc<TelemetryQueue>,
    log_writer: LogWriter,
    sink: Box<dyn TimeSeriesSink>,
    cycle_period: Duration,
}

impl CycleEngine {
    pub fn new(
        tree: Component,
        commands: mpsc::UnboundedReceiver<Command>,
        telemetry_queue: Arc<TelemetryQueue>,
        log_writer: LogWriter,
        sink: Box<dyn TimeSeriesSink>,
    ) -> Self {
        Self { tree, commands, telemetry_queue, log_writer, sink, cycle_period: CYCLE_PERIOD }
    }

    async fn run_one_cycle(&mut self) -> Result<(), AppError> {
        let command = self.commands.try_recv().unwrap_or_else(|_| Command::no_op());

        if !command.target.is_empty() {
            let path: Vec<&str> = command.target.split('.').collect();
            if let Err(fault) = self.tree.dispatch(&path, &command).await {
                match fault {
                    CommandFault::Warning(msg) => warn!(target = %command.target, %msg, "command rejected"),
                    CommandFault::Fatal(msg) => warn!(target = %command.target, %msg, "command failed fatally"),
                }
            }
        }

        self.tree.check_state().await;
        self.tree.complete_commands();

        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;
        let points = self.tree.gather_and_drain(timestamp, "").await;
        let buckets = bucket_by_timestamp(points);

        self.telemetry_queue.push(buckets.clone()).await;
        self.log_writer.write_cycle(&buckets).await?;
        self.sink.publish(&buckets).await;

        Ok(())
    }
}

impl Task for CycleEngine {
    fn id(&self) -> &str {
        "cycle-engine"
    }

    fn run(mut self: Box<Self>, shutdown: CancellationToken) -> TaskFuture {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.cycle_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(period_ms = self.cycle_period.as_millis() as u64, "cycle engine started");
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run_one_cycle().await?;
                    }
                }
            }
            info!("cycle engine stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SubcomponentConfig, VcuConfig};
    use crate::sink::NullSink;
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    async fn engine_with_empty_tree() -> (CycleEngine, mpsc::UnboundedSender<Command>, Arc<TelemetryQueue>, NamedTempFile) {
        let config = Config {
            cmd_port: 6060,
            telem_port: 6666,
            log_path: "vcuhil.log".into(),
            sink_url: None,
            vcus: BTreeMap::new(),
        };
        let tree = crate::component::build_tree(&config);
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(TelemetryQueue::new(4));
        let tmp = NamedTempFile::new().unwrap();
        let log_writer = LogWriter::open(tmp.path()).await.unwrap();
        let engine = CycleEngine::new(tree, rx, queue.clone(), log_writer, Box::new(NullSink));
        (engine, tx, queue, tmp)
    }

    #[tokio::test]
    async fn empty_tree_cycle_publishes_nothing() {
        let (mut engine, _tx, queue, _tmp) = engine_with_empty_tree().await;
        engine.run_one_cycle().await.unwrap();
        let drained = queue.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(drained[0].is_empty());
    }

    #[tokio::test]
    async fn unknown_target_does_not_abort_the_cycle() {
        let (mut engine, tx, queue, _tmp) = engine_with_empty_tree().await;
        tx.send(Command {
            operation: crate::command::Operation::Enable,
            target: "no-such-vcu".into(),
            options: serde_json::Value::Null,
        })
        .unwrap();
        engine.run_one_cycle().await.unwrap();
        assert_eq!(queue.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn vcu_present_produces_telemetry_point() {
        let mut vcu: VcuConfig = BTreeMap::new();
        vcu.insert("psu".into(), SubcomponentConfig::PowerSupply { host: "psu-host".into(), port: 9221 });
        let mut vcus = BTreeMap::new();
        vcus.insert("donatello".into(), vcu);
        let config = Config { cmd_port: 6060, telem_port: 6666, log_path: "vcuhil.log".into(), sink_url: None, vcus };
        let tree = crate::component::build_tree(&config);
        let (_tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(TelemetryQueue::new(4));
        let tmp = NamedTempFile::new().unwrap();
        let log_writer = LogWriter::open(tmp.path()).await.unwrap();
        let mut engine = CycleEngine::new(tree, rx, queue.clone(), log_writer, Box::new(NullSink));

        engine.run_one_cycle().await.unwrap();
        let drained = queue.drain().await;
        let points: Vec<_> = drained[0].iter().flat_map(|b| b.points.iter()).collect();
        assert!(points.iter().any(|p| p.name == "VCU HIL.donatello.vcu_state"));
    }
}
