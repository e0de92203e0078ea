//! Integration tests for the full reconciliation cycle.
//!
//! Tests: RunStore → BoundaryService → FeedPlan → Sampler → Reconciler → Ledger → AuditStore
//!
//! Verifies:
//! - Cumulative postings for direct and semi-finished feeders
//! - Re-running a cycle over the same data posts nothing new
//! - Rejected postings hold their key until an adjustment
//! - Missing configuration is reported, not fatal

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use feedpost_core::{FeederId, FormulaVersion, LineId, LotNo, MaterialCode, ProductCode, RunKey};
    use feedpost_production::ProductionRun;
    use feedpost_recipe::{FormulaKey, FormulaRow, RatioGroup};
    use feedpost_reconcile::{PostingKey, PostingOrigin, PostingStatus, SensorAnomaly};

    use crate::adjustment::{AdjustmentError, AdjustmentRequest, AdjustmentTarget};
    use crate::config::EngineConfig;
    use crate::driver::{CycleError, CycleErrorKind, CyclePorts, Driver};
    use crate::ledger::InMemoryLedger;
    use crate::metric::{AccumulatorPoint, InMemoryMetricStore};
    use crate::notify::{InMemoryNotifier, Notice};
    use crate::runner::CycleRunner;
    use crate::store::{
        AuditStore, InMemoryAuditStore, InMemoryBoundaryStore, InMemoryRecipeStore,
        InMemoryRunStore, InMemorySheetStore,
    };

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn lot() -> LotNo {
        LotNo::new("LOT-1").unwrap()
    }

    fn material(code: &str) -> MaterialCode {
        MaterialCode::new(code).unwrap()
    }

    fn feeder(i: u16) -> FeederId {
        FeederId::new(i).unwrap()
    }

    struct Harness {
        runs: Arc<InMemoryRunStore>,
        recipes: Arc<InMemoryRecipeStore>,
        audit: Arc<InMemoryAuditStore>,
        metrics: Arc<InMemoryMetricStore>,
        ledger: Arc<InMemoryLedger>,
        notifier: Arc<InMemoryNotifier>,
        driver: Arc<Driver>,
    }

    fn harness() -> Harness {
        let runs = Arc::new(InMemoryRunStore::new());
        let recipes = Arc::new(InMemoryRecipeStore::new());
        let audit = Arc::new(InMemoryAuditStore::new());
        let metrics = Arc::new(InMemoryMetricStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let ports = CyclePorts {
            runs: runs.clone(),
            recipes: recipes.clone(),
            audit: audit.clone(),
            boundaries: Arc::new(InMemoryBoundaryStore::new()),
            sheets: Arc::new(InMemorySheetStore::new()),
            metrics: metrics.clone(),
            ledger: ledger.clone(),
            notifier: notifier.clone(),
        };
        let driver = Arc::new(Driver::new(ports, &EngineConfig::default()));
        Harness {
            runs,
            recipes,
            audit,
            metrics,
            ledger,
            notifier,
            driver,
        }
    }

    impl Harness {
        /// Open run L1#1 (lot LOT-1, product P-100, planned 1000) with the given formula.
        fn with_run(&self, rows: Vec<FormulaRow>) -> RunKey {
            let key = RunKey::new(LineId::new("L1").unwrap(), 1);
            let run = ProductionRun::new(
                key.clone(),
                ProductCode::new("P-100").unwrap(),
                lot(),
                FormulaVersion::new("v1").unwrap(),
                1000.0,
                500.0,
                t(0),
                None,
            )
            .unwrap();
            self.runs.upsert(run);
            if !rows.is_empty() {
                self.recipes.insert_formula(
                    FormulaKey {
                        line: key.line.clone(),
                        version: FormulaVersion::new("v1").unwrap(),
                        product: ProductCode::new("P-100").unwrap(),
                    },
                    rows,
                );
            }
            key
        }

        fn reading(&self, minute: i64, values: &[Option<f64>]) {
            self.metrics.push_accumulator(
                "line/L1",
                AccumulatorPoint {
                    at: t(minute),
                    values: values.to_vec(),
                },
            );
        }
    }

    fn row(f: u16, code: &str, ratio: f64, group: Option<RatioGroup>) -> FormulaRow {
        FormulaRow {
            feeder: feeder(f),
            material: material(code),
            ratio_pct: ratio,
            semi_finished: group,
            tolerance_pct: 0.5,
            max_load_per_hour: None,
        }
    }

    #[tokio::test]
    async fn direct_feeder_posts_cumulative_and_output() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.reading(0, &[Some(100.0)]);
        h.reading(60, &[Some(250.0)]);

        let report = h.driver.run_cycle(t(61)).await.unwrap();

        assert_eq!(report.runs_processed, 1);
        assert_eq!(report.postings, 2);
        assert_eq!(h.ledger.picks()[0].cumulative_qty, 150.0);
        assert_eq!(h.ledger.pays()[0].cumulative_qty, 150.0);
        assert!(h.audit.all().iter().all(|r| r.is_consistent()));
    }

    #[tokio::test]
    async fn repeated_cycle_posts_nothing_new() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.reading(0, &[Some(100.0)]);
        h.reading(60, &[Some(250.0)]);

        h.driver.run_cycle(t(61)).await.unwrap();
        let again = h.driver.run_cycle(t(61)).await.unwrap();
        assert_eq!(again.postings, 0);
        assert_eq!(h.audit.all().len(), 2);

        h.reading(90, &[Some(300.0)]);
        h.driver.run_cycle(t(91)).await.unwrap();

        let picks = h.ledger.picks();
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[1].cumulative_qty, 200.0);
        let key = PostingKey::pick(lot(), feeder(1), material("M-1"));
        let latest = h.audit.latest(&key).await.unwrap().unwrap();
        assert_eq!((latest.cumulative_before, latest.delta), (150.0, 50.0));
    }

    #[tokio::test]
    async fn counter_reset_suppresses_contribution() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.reading(0, &[Some(500.0)]);
        h.reading(30, &[Some(20.0)]);

        let report = h.driver.run_cycle(t(31)).await.unwrap();

        assert_eq!(report.postings, 0);
        assert_eq!(report.anomalies[0].anomaly, SensorAnomaly::CounterReset);
        assert!(h.ledger.picks().is_empty());
        assert!(h.ledger.pays().is_empty());
    }

    #[tokio::test]
    async fn unreported_feeder_is_stale() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 60.0, None), row(2, "M-2", 40.0, None)]);
        h.reading(0, &[Some(0.0)]);
        h.reading(30, &[Some(60.0)]);

        let report = h.driver.run_cycle(t(31)).await.unwrap();

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].feeder, feeder(2));
        assert_eq!(report.anomalies[0].anomaly, SensorAnomaly::Stale);
        assert_eq!(h.ledger.picks().len(), 1);
    }

    #[tokio::test]
    async fn semi_finished_group_stops_at_planned_share() {
        let h = harness();
        h.with_run(vec![
            row(1, "SF-A1", 39.0, Some(RatioGroup::A)),
            row(2, "SF-A2", 1.0, Some(RatioGroup::A)),
        ]);
        h.reading(0, &[Some(0.0), Some(0.0)]);
        // SF-A1 reaches its 390 share at once; SF-A2 is still below its 10.
        h.reading(30, &[Some(400.0), Some(8.0)]);
        h.driver.run_cycle(t(31)).await.unwrap();

        h.reading(60, &[Some(400.0), Some(420.0)]);
        h.driver.run_cycle(t(61)).await.unwrap();

        let a1 = h
            .audit
            .latest(&PostingKey::pick(lot(), feeder(1), material("SF-A1")))
            .await
            .unwrap()
            .unwrap();
        let a2 = h
            .audit
            .latest(&PostingKey::pick(lot(), feeder(2), material("SF-A2")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a1.cumulative_after, 390.0);
        assert_eq!((a2.cumulative_before, a2.cumulative_after), (0.2, 10.0));

        let pay = h.audit.latest(&PostingKey::pay(lot())).await.unwrap().unwrap();
        assert_eq!(pay.cumulative_after, 400.0);
    }

    #[tokio::test]
    async fn rejected_key_is_held_until_adjusted() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.ledger.reject_material(material("M-1"));
        h.reading(0, &[Some(0.0)]);
        h.reading(60, &[Some(150.0)]);

        let first = h.driver.run_cycle(t(61)).await.unwrap();
        assert_eq!(first.rejected, 1);
        assert!(h.ledger.pays().is_empty(), "pay waits for picks to settle");
        assert!(matches!(h.notifier.all()[0], Notice::PostingRejected { .. }));

        let second = h.driver.run_cycle(t(62)).await.unwrap();
        let key = PostingKey::pick(lot(), feeder(1), material("M-1"));
        assert_eq!(second.postings, 0);
        assert_eq!(second.held, vec![key.clone()]);

        h.ledger.accept_material(&material("M-1"));
        let adjusted = h
            .driver
            .apply_adjustment(
                &AdjustmentRequest {
                    lot: lot(),
                    product: ProductCode::new("P-100").unwrap(),
                    target: AdjustmentTarget::Pick {
                        feeder: feeder(1),
                        material: material("M-1"),
                    },
                    before: 0.0,
                    after: 150.0,
                },
                t(70),
            )
            .await
            .unwrap();
        assert_eq!(adjusted.status, PostingStatus::Accepted);
        assert_eq!(adjusted.origin, PostingOrigin::Adjustment);

        let third = h.driver.run_cycle(t(71)).await.unwrap();
        assert!(third.held.is_empty());
        assert_eq!(h.ledger.picks().len(), 1);
        assert_eq!(h.ledger.pays()[0].cumulative_qty, 150.0);
    }

    #[tokio::test]
    async fn stale_adjustment_is_refused() {
        let h = harness();
        h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.reading(0, &[Some(0.0)]);
        h.reading(60, &[Some(150.0)]);
        h.driver.run_cycle(t(61)).await.unwrap();

        let err = h
            .driver
            .apply_adjustment(
                &AdjustmentRequest {
                    lot: lot(),
                    product: ProductCode::new("P-100").unwrap(),
                    target: AdjustmentTarget::Pay,
                    before: 0.0,
                    after: 140.0,
                },
                t(70),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdjustmentError::BaselineMismatch { posted, .. } if posted == 150.0));
    }

    #[tokio::test]
    async fn missing_formula_is_reported_and_notified() {
        let h = harness();
        let key = h.with_run(Vec::new());

        let report = h.driver.run_cycle(t(30)).await.unwrap();

        assert_eq!(report.runs_processed, 0);
        assert_eq!(report.errored_runs.len(), 1);
        assert_eq!(report.errored_runs[0].run, key);
        assert_eq!(report.errored_runs[0].kind, CycleErrorKind::ConfigurationMissing);
        assert!(matches!(
            h.notifier.all()[0],
            Notice::ConfigurationMissing { .. }
        ));
    }

    #[tokio::test]
    async fn busy_run_is_skipped() {
        let h = harness();
        let key = h.with_run(vec![row(1, "M-1", 100.0, None)]);
        h.reading(0, &[Some(0.0)]);
        h.reading(30, &[Some(10.0)]);

        let _permit = h.driver.guard().acquire(&key).unwrap();
        let report = h.driver.run_cycle(t(31)).await.unwrap();

        assert_eq!(report.errored_runs[0].kind, CycleErrorKind::RunBusy);
        assert!(h.ledger.picks().is_empty());
        assert!(matches!(
            h.driver.guard().acquire(&key),
            Err(CycleError::RunBusy(_))
        ));
    }

    #[tokio::test]
    async fn runner_cycles_on_start_and_on_trigger() {
        let h = harness();
        let handle = CycleRunner::from_cadence(StdDuration::from_secs(3600)).spawn(h.driver.clone());

        for target in [1, 2] {
            if target == 2 {
                handle.trigger();
            }
            let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
            while handle.cycles_completed() < target && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(StdDuration::from_millis(10)).await;
            }
            assert!(handle.cycles_completed() >= target);
        }

        handle.shutdown().await;
    }
}
