//! Scenario tests across planning, execution and merging.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::errors::AnnoflowError;
    use crate::events::CollectingEventSink;
    use crate::executor::{
        run_builtin, CheckpointedExecutor, MarkerStore, RunStatus, StepOutcome, StepRunner,
    };
    use crate::pipeline::AnnotationPipeline;
    use crate::plan::RunLayout;
    use crate::step::{Step, StepAction, StepState};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    /// Records every step it runs; optionally fails one step.
    #[derive(Debug, Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail: Mutex<Option<(String, i32)>>,
    }

    impl RecordingRunner {
        fn failing(step: &str, exit_code: i32) -> Self {
            let runner = Self::default();
            *runner.fail.lock() = Some((step.to_string(), exit_code));
            runner
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn stop_failing(&self) {
            *self.fail.lock() = None;
        }
    }

    #[async_trait]
    impl StepRunner for RecordingRunner {
        async fn run(&self, step: &Step) -> Result<StepOutcome, AnnoflowError> {
            self.calls.lock().push(step.name.clone());
            if let Some((name, code)) = self.fail.lock().as_ref() {
                if *name == step.name {
                    return Ok(StepOutcome::exited(*code));
                }
            }
            Ok(StepOutcome::success())
        }
    }

    fn steps(names: &[&str]) -> Vec<Step> {
        names
            .iter()
            .map(|n| Step::command(*n, "tool", vec![n.to_string()]))
            .collect()
    }

    fn layout() -> (tempfile::TempDir, RunLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path().join("run"));
        (dir, layout)
    }

    #[tokio::test]
    async fn test_fresh_run_executes_everything() {
        let (_dir, layout) = layout();
        let steps = steps(&["a", "b", "c"]);
        let executor = CheckpointedExecutor::new(layout.clone(), RecordingRunner::default());

        let report = executor.run(&steps).await.unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.executed, ["a", "b", "c"]);
        assert!(report.skipped.is_empty());
        assert!(layout.ok_marker().exists());
        assert!(layout.step_marker("c").exists());
        assert!(executor.step_states().iter().all(|(_, s)| *s == StepState::Done));
    }

    #[tokio::test]
    async fn test_resume_runs_only_remaining_steps() {
        let (_dir, layout) = layout();
        let steps = steps(&["a", "b", "c", "d"]);
        let markers = MarkerStore::new(layout.clone());
        markers.prepare().unwrap();
        markers.mark_done(&steps[0]).unwrap();
        markers.mark_done(&steps[1]).unwrap();

        let executor = CheckpointedExecutor::new(layout, RecordingRunner::default());
        let report = executor.run(&steps).await.unwrap();

        assert_eq!(executor.runner().calls(), ["c", "d"]);
        assert_eq!(report.skipped, ["a", "b"]);
        assert_eq!(report.executed, ["c", "d"]);
    }

    #[tokio::test]
    async fn test_failure_writes_wrong_and_stops() {
        let (_dir, layout) = layout();
        let steps = steps(&["a", "b", "c"]);
        let executor = CheckpointedExecutor::new(layout.clone(), RecordingRunner::failing("b", 2));

        let err = executor.run(&steps).await.unwrap_err();
        match err {
            AnnoflowError::StepExecution(e) => {
                assert_eq!(e.step, "b");
                assert_eq!(e.exit_code, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert_eq!(executor.runner().calls(), ["a", "b"]);
        assert!(layout.step_marker("a").exists());
        assert!(!layout.step_marker("b").exists());
        assert!(!layout.ok_marker().exists());

        let failure = executor.markers().failure().unwrap().unwrap();
        assert_eq!(failure.step, "b");
        assert_eq!(failure.exit_code, Some(2));

        assert_eq!(
            executor.step_states(),
            vec![
                ("a".to_string(), StepState::Done),
                ("b".to_string(), StepState::Failed),
                ("c".to_string(), StepState::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_run_is_noop_until_reset() {
        let (_dir, layout) = layout();
        let steps = steps(&["a", "b", "c"]);
        let sink = Arc::new(CollectingEventSink::new());
        let executor = CheckpointedExecutor::new(layout, RecordingRunner::failing("b", 1))
            .with_event_sink(sink.clone());

        assert!(executor.run(&steps).await.is_err());

        let report = executor.run(&steps).await.unwrap();
        assert!(report.is_noop());
        assert_eq!(report.status, RunStatus::Wrong);
        assert_eq!(executor.runner().calls(), ["a", "b"]);
        assert_eq!(sink.event_types().last(), Some(&"run.noop"));

        executor.runner().stop_failing();
        assert!(executor.reset_failure().unwrap());
        let report = executor.run(&steps).await.unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.executed, ["b", "c"]);
        assert_eq!(executor.runner().calls(), ["a", "b", "b", "c"]);
    }

    #[tokio::test]
    async fn test_completed_run_is_noop() {
        let (_dir, layout) = layout();
        let steps = steps(&["a"]);
        let executor = CheckpointedExecutor::new(layout, RecordingRunner::default());

        executor.run(&steps).await.unwrap();
        let report = executor.run(&steps).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(executor.runner().calls(), ["a"]);
    }

    #[tokio::test]
    async fn test_changed_plan_is_rejected() {
        let (_dir, layout) = layout();
        let executor = CheckpointedExecutor::new(layout, RecordingRunner::failing("b", 1));
        assert!(executor.run(&steps(&["a", "b"])).await.is_err());
        executor.reset_failure().unwrap();

        let err = executor.run(&steps(&["a", "x"])).await.unwrap_err();
        assert!(matches!(err, AnnoflowError::PlanMismatch { .. }));
        assert_eq!(executor.runner().calls(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let (_dir, layout) = layout();
        let steps = steps(&["a", "b"]);
        let markers = MarkerStore::new(layout.clone());
        markers.prepare().unwrap();
        markers.mark_done(&steps[0]).unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        CheckpointedExecutor::new(layout, RecordingRunner::default())
            .with_event_sink(sink.clone())
            .run(&steps)
            .await
            .unwrap();

        assert_eq!(
            sink.event_types(),
            ["run.started", "step.skipped", "step.started", "step.completed", "run.completed"]
        );
        assert_eq!(sink.steps_with("step.completed"), ["b"]);
    }

    /// Removes the status directory while "running", so the marker write fails.
    struct MarkerSabotage {
        status_dir: std::path::PathBuf,
    }

    #[async_trait]
    impl StepRunner for MarkerSabotage {
        async fn run(&self, _step: &Step) -> Result<StepOutcome, AnnoflowError> {
            fs::remove_dir_all(&self.status_dir).unwrap();
            Ok(StepOutcome::success())
        }
    }

    #[tokio::test]
    async fn test_marker_write_failure_is_fatal_without_wrong() {
        let (_dir, layout) = layout();
        let executor = CheckpointedExecutor::new(
            layout.clone(),
            MarkerSabotage {
                status_dir: layout.status_dir(),
            },
        );

        let err = executor.run(&steps(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, AnnoflowError::Io(_)));
        assert!(!layout.wrong_marker().exists());
        assert!(!layout.ok_marker().exists());
    }

    #[tokio::test]
    async fn test_missing_run_input_fails_step() {
        let (_dir, layout) = layout();
        let step = Step::command("b", "tool", vec![])
            .with_inputs([layout.root().join("never_written.tsv")]);
        let executor = CheckpointedExecutor::new(layout.clone(), RecordingRunner::default());

        let err = executor.run(&[step]).await.unwrap_err();
        assert!(matches!(err, AnnoflowError::Io(_)));
        assert!(executor.runner().calls().is_empty());
        assert_eq!(executor.markers().status(), RunStatus::Wrong);
    }

    /// Stands in for the aligner, loader and annotator. The annotator keeps
    /// every other query sequence as annotated.
    #[derive(Debug, Default)]
    struct FakeTools {
        calls: Mutex<Vec<String>>,
    }

    fn headers(fasta: &Path) -> Vec<(String, String)> {
        let text = fs::read_to_string(fasta).unwrap();
        let mut records = Vec::new();
        for line in text.lines() {
            if let Some(id) = line.strip_prefix('>') {
                records.push((id.to_string(), String::new()));
            } else if let Some(last) = records.last_mut() {
                last.1.push_str(line);
            }
        }
        records
    }

    #[async_trait]
    impl StepRunner for FakeTools {
        async fn run(&self, step: &Step) -> Result<StepOutcome, AnnoflowError> {
            self.calls.lock().push(step.name.clone());
            crate::executor::create_output_dirs(step)?;
            let database = step.name.split('.').next().unwrap_or_default();

            match &step.action {
                StepAction::Builtin(builtin) => run_builtin(builtin)?,
                StepAction::Command { .. } if step.name.ends_with(".align") => {
                    let mut out = String::new();
                    for (id, _) in headers(&step.inputs[0]) {
                        out.push_str(&format!("{id}\t{database}_hit\t97.5\n"));
                    }
                    fs::write(&step.outputs[0], out)?;
                }
                StepAction::Command { .. } if step.name.ends_with(".load") => {
                    fs::write(&step.outputs[0], "")?;
                }
                StepAction::Command { .. } => {
                    let mut annotation = String::from("sequence_id\thit_rank\tsubject\n");
                    let mut residue = String::new();
                    for (index, (id, seq)) in headers(&step.inputs[0]).into_iter().enumerate() {
                        if index % 2 == 0 {
                            annotation.push_str(&format!("{id}\t1\t{database}_hit\n"));
                        } else {
                            residue.push_str(&format!(">{id}\n{seq}\n"));
                        }
                    }
                    fs::write(&step.outputs[0], annotation)?;
                    fs::write(&step.outputs[1], residue)?;
                }
            }
            Ok(StepOutcome::success())
        }
    }

    #[tokio::test]
    async fn test_end_to_end_with_fake_tools() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("input.fasta");
        let mut fasta = String::new();
        for i in 1..=8 {
            fasta.push_str(&format!(">contig_{i} sample=x\nACGT\n"));
        }
        fs::write(&corpus, fasta).unwrap();

        let config = PipelineConfig::new(dir.path().join("run"), &corpus)
            .with_rank("dicots_04", 1)
            .with_rank("gymno_01", 2)
            .with_rank("refseq_plant", 0)
            .with_rank("nt_complete", 3);
        let pipeline = AnnotationPipeline::from_config(config).unwrap();

        let sink = Arc::new(CollectingEventSink::new());
        let report = pipeline.run(FakeTools::default(), sink.clone()).await.unwrap();
        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.executed.len(), pipeline.steps().len());

        let layout = pipeline.layout();
        let report_text = fs::read_to_string(layout.statistics_report()).unwrap();
        assert_eq!(
            report_text,
            "database_id\tannotated_count\tremaining_count\n\
             dicots_04\t4\t4\n\
             gymno_01\t2\t2\n\
             nt_complete\t1\t1\n\
             TOTAL\t7\t1\n"
        );

        let (final_alignment, final_annotation) = layout.final_outputs();
        let alignment = fs::read_to_string(final_alignment).unwrap();
        assert_eq!(alignment.lines().count(), 8 + 4 + 2);
        assert!(alignment.starts_with("contig_1\tdicots_04_hit"));

        let annotation = fs::read_to_string(final_annotation).unwrap();
        let ids: Vec<&str> = annotation
            .lines()
            .skip(1)
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(ids.len(), 7);
        assert!(ids.iter().all(|id| id.starts_with("contig_")));
        assert!(annotation.starts_with("sequence_id\thit_rank\tsubject\n"));

        let status = pipeline.status().unwrap();
        assert_eq!(status.run, RunStatus::Ok);
        assert!(status.next_step().is_none());

        // A second invocation does nothing.
        let again = pipeline.run(FakeTools::default(), sink).await.unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_end_to_end_resume_after_merge_failure() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("input.fasta");
        fs::write(&corpus, ">a\nAC\n>b\nGT\n>c\nTT\n").unwrap();

        let config = PipelineConfig::new(dir.path().join("run"), &corpus)
            .with_rank("dicots_04", 1)
            .with_rank("gymno_01", 2);
        let pipeline = AnnotationPipeline::from_config(config).unwrap();
        let layout = pipeline.layout().clone();

        // Corrupt gymno_01's annotation as soon as it exists, by running up to
        // the merge with a runner that writes a bad header for it.
        struct BadAnnotation(FakeTools);

        #[async_trait]
        impl StepRunner for BadAnnotation {
            async fn run(&self, step: &Step) -> Result<StepOutcome, AnnoflowError> {
                let outcome = self.0.run(step).await?;
                if step.name == "gymno_01.annotate" {
                    fs::write(&step.outputs[0], "id\trank\nq\t1\n")?;
                }
                Ok(outcome)
            }
        }

        let err = pipeline
            .run(BadAnnotation(FakeTools::default()), Arc::new(CollectingEventSink::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AnnoflowError::MergeFormat(_)));

        let status = pipeline.status().unwrap();
        assert_eq!(status.run, RunStatus::Wrong);
        assert_eq!(status.failure.as_ref().unwrap().step, "branch.merge");
        assert_eq!(status.next_step(), Some("branch.merge"));

        // Fix the file by hand, clear WRONG and resume.
        let gymno = layout.stage_outputs("gymno_01").annotation_result;
        fs::write(&gymno, "sequence_id\thit_rank\tsubject\n").unwrap();
        MarkerStore::new(layout.clone()).clear_wrong().unwrap();

        let tools = FakeTools::default();
        let executor = pipeline.executor(tools);
        let report = executor.run(pipeline.steps()).await.unwrap();

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.executed, ["branch.merge", "final.merge", "statistics"]);
        assert_eq!(executor.runner().calls.lock().clone(), report.executed);
    }
}
