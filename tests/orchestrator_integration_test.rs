//! 编排器集成测试：路由 → 节点配置 → 分级回退 → 评估 → 会话记录

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crm_agent::agents::{
        Capability, EvaluationResult, Evaluator, EvaluatorError, NodeName, RetryPolicy, Worker,
        WorkerInvocation, WorkerRegistry,
    };
    use crm_agent::core::{Completion, Orchestrator, OrchestratorBuilder, OrchestratorError};
    use crm_agent::llm::{ProviderRegistry, ScriptedLlmClient, ScriptedReply};
    use crm_agent::memory::{Message, Role};
    use crm_agent::node_config::{
        ConfigCache, ConfigService, ConfigServiceError, NodeConfigRecord, NodeDefaults,
        StaticConfigService, UserConfig,
    };

    struct Harness {
        orchestrator: Orchestrator,
        service: Arc<StaticConfigService>,
        client: Arc<ScriptedLlmClient>,
    }

    fn harness_with(
        client: ScriptedLlmClient,
        customize: impl FnOnce(OrchestratorBuilder) -> OrchestratorBuilder,
    ) -> Harness {
        let service = Arc::new(StaticConfigService::new());
        let client = Arc::new(client);
        let cache = Arc::new(ConfigCache::new(service.clone(), NodeDefaults::builtin("mock")));
        let builder = OrchestratorBuilder::new(cache, Arc::new(ProviderRegistry::single(client.clone())));
        Harness {
            orchestrator: customize(builder).build(),
            service,
            client,
        }
    }

    fn harness(client: ScriptedLlmClient) -> Harness {
        harness_with(client, |b| b)
    }

    /// 按队列返回评估结果，最后一条一直复用；Err 表示评估调用失败
    struct ScriptedEvaluator {
        results: Mutex<VecDeque<Result<EvaluationResult, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedEvaluator {
        fn new(results: Vec<Result<EvaluationResult, String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(
            &self,
            _user_id: &str,
            _original_request: &str,
            _output: &str,
            _cancel: &CancellationToken,
        ) -> Result<EvaluationResult, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                results.front().cloned().unwrap()
            };
            next.map_err(EvaluatorError::Parse)
        }
    }

    #[tokio::test]
    async fn test_find_jobs_end_to_end_with_defaults() {
        let h = harness(ScriptedLlmClient::new());
        let cancel = CancellationToken::new();

        let outcome = h
            .orchestrator
            .handle_turn("s1", "u1", "find jobs", &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.node, NodeName::JobSearch);
        assert_eq!(outcome.model, "gpt-4o-mini");
        assert_eq!(outcome.response, "[gpt-4o-mini] find jobs");
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.evaluation.is_none());

        let history = h.orchestrator.get_session_history("s1", 10_000).await.unwrap();
        assert_eq!(
            history,
            vec![
                Message::user("find jobs"),
                Message::assistant("[gpt-4o-mini] find jobs"),
            ]
        );
        assert_eq!(h.service.load_count(), 1);
        assert_eq!(h.client.calls().len(), 1);
        assert_eq!(h.client.calls()[0].request.tools, NodeName::JobSearch.capability().tools);
    }

    struct CountingWorker {
        node: NodeName,
        capability: Capability,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        fn node(&self) -> NodeName {
            self.node
        }

        fn capability(&self) -> &Capability {
            &self.capability
        }

        async fn invoke(
            &self,
            _invocation: &WorkerInvocation,
            _cancel: &CancellationToken,
        ) -> Result<Completion, OrchestratorError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                content: format!("handled by {}", self.node),
                model: "counting".into(),
                tier: None,
                promotions: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_every_turn_dispatches_exactly_one_worker() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut workers = WorkerRegistry::new();
        for node in NodeName::ALL {
            workers.register(Arc::new(CountingWorker {
                node,
                capability: node.capability(),
                invocations: invocations.clone(),
            }));
        }
        let h = harness_with(ScriptedLlmClient::new(), |b| b.with_workers(workers));
        let cancel = CancellationToken::new();

        let inputs = [
            "find jobs",
            "draft an email to my contacts about open positions",
            "update the Acme deal",
            "hello there",
            "",
            "jobs deals emails",
        ];
        for (i, input) in inputs.iter().enumerate() {
            let outcome = h
                .orchestrator
                .handle_turn("s1", "u1", input, &cancel)
                .await
                .unwrap();
            assert_eq!(invocations.load(Ordering::SeqCst), i + 1);
            assert_eq!(outcome.response, format!("handled by {}", outcome.node));
        }
    }

    #[tokio::test]
    async fn test_evaluator_retry_then_accept() {
        let client = ScriptedLlmClient::new()
            .script("gpt-4o", ScriptedReply::Text("You have deals.".into()))
            .script("gpt-4o", ScriptedReply::Text("You have 3 open deals worth $40k.".into()));
        let evaluator = ScriptedEvaluator::new(vec![
            Ok(EvaluationResult::rejected("include counts and totals", 40)),
            Ok(EvaluationResult::accepted(92)),
        ]);
        let h = harness_with(client, |b| {
            b.with_evaluator(evaluator.clone()).with_retry_policy(RetryPolicy::new(2))
        });

        let outcome = h
            .orchestrator
            .handle_turn("s1", "u1", "summarise my deals", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.response, "You have 3 open deals worth $40k.");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.evaluation.as_ref().map(|e| e.score), Some(92));
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);

        let calls = h.client.calls();
        assert!(!calls[0].request.messages[0].content.contains("include counts"));
        assert!(calls[1].request.messages[0].content.contains("include counts and totals"));

        let history = h.orchestrator.get_session_history("s1", 10_000).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, outcome.response);
    }

    #[tokio::test]
    async fn test_retry_ceiling_surfaces_last_output() {
        let client = ScriptedLlmClient::new().script("gpt-4o", ScriptedReply::Text("meh".into()));
        let evaluator = ScriptedEvaluator::new(vec![Ok(EvaluationResult::rejected("still vague", 10))]);
        let h = harness_with(client, |b| {
            b.with_evaluator(evaluator.clone()).with_retry_policy(RetryPolicy::new(1))
        });

        let err = h
            .orchestrator
            .handle_turn("s1", "u1", "summarise my deals", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::RetryCeilingReached { attempts, last_output } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_output, "meh");
            }
            other => panic!("expected RetryCeilingReached, got {other:?}"),
        }
        assert_eq!(h.client.call_count("gpt-4o"), 2);
        assert!(h.orchestrator.get_session_history("s1", 10_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_input_needed_stops_without_retry() {
        let evaluator = ScriptedEvaluator::new(vec![Ok(EvaluationResult::needs_user_input(
            "ask which pipeline",
        ))]);
        let h = harness_with(ScriptedLlmClient::new(), |b| b.with_evaluator(evaluator.clone()));

        let outcome = h
            .orchestrator
            .handle_turn("s1", "u1", "move the deal", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.evaluation.unwrap().user_input_needed);
        assert_eq!(h.client.calls().len(), 1);
        assert_eq!(h.orchestrator.get_session_history("s1", 10_000).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_evaluator_failure_accepts_output() {
        let evaluator = ScriptedEvaluator::new(vec![Err("garbled".into())]);
        let h = harness_with(ScriptedLlmClient::new(), |b| b.with_evaluator(evaluator));

        let outcome = h
            .orchestrator
            .handle_turn("s1", "u1", "hello", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.evaluation.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_user_config_picks_up_new_model() {
        let h = harness(ScriptedLlmClient::new());
        let cancel = CancellationToken::new();
        h.service
            .set_user_config(
                "u1",
                UserConfig::default().with_node(NodeConfigRecord::new("crm_worker", "crm-v1", "mock")),
            )
            .await;

        let first = h.orchestrator.handle_turn("s1", "u1", "list deals", &cancel).await.unwrap();
        assert_eq!(first.model, "crm-v1");

        h.service
            .set_user_config(
                "u1",
                UserConfig::default().with_node(NodeConfigRecord::new("crm_worker", "crm-v2", "mock")),
            )
            .await;
        let stale = h.orchestrator.handle_turn("s1", "u1", "list deals", &cancel).await.unwrap();
        assert_eq!(stale.model, "crm-v1");
        assert_eq!(h.service.load_count(), 1);

        h.orchestrator.invalidate_user_config("u1").await;
        let fresh = h.orchestrator.handle_turn("s1", "u1", "list deals", &cancel).await.unwrap();
        assert_eq!(fresh.model, "crm-v2");
        assert_eq!(h.service.load_count(), 2);
    }

    #[tokio::test]
    async fn test_fallback_chain_promotes_within_turn() {
        let client = ScriptedLlmClient::new()
            .script("writer-fast", ScriptedReply::Hang)
            .script("writer-backup", ScriptedReply::Text("Dear Jane,".into()));
        let h = harness(client);
        h.service
            .set_user_config(
                "u1",
                UserConfig::default().with_node(
                    NodeConfigRecord::new("writer_worker", "writer-main", "mock").with_chain_json(
                        r#"[{"model":"writer-fast","first_token_timeout_ms":40},
                            {"model":"writer-backup","first_token_timeout_ms":2000}]"#,
                    ),
                ),
            )
            .await;

        let outcome = h
            .orchestrator
            .handle_turn("s1", "u1", "draft an email to Jane", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.node, NodeName::WriterWorker);
        assert_eq!(outcome.model, "writer-backup");
        assert_eq!(outcome.response, "Dear Jane,");
        assert_eq!(h.client.call_count("writer-main"), 0);
        assert!(h.client.calls()[0].cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_exhausted_chain_fails_turn_and_records_nothing() {
        let client = ScriptedLlmClient::new()
            .script("a", ScriptedReply::Fail("overloaded".into()))
            .script("b", ScriptedReply::Hang);
        let h = harness(client);
        h.service
            .set_user_config(
                "u1",
                UserConfig::default().with_node(
                    NodeConfigRecord::new("general_worker", "main", "mock").with_chain_json(
                        r#"[{"model":"a","timeout_ms":500},{"model":"b","timeout_ms":30}]"#,
                    ),
                ),
            )
            .await;

        let err = h
            .orchestrator
            .handle_turn("s1", "u1", "hello", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::AllTiersExhausted { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].model, "a");
                assert_eq!(failures[1].model, "b");
            }
            other => panic!("expected AllTiersExhausted, got {other:?}"),
        }
        assert!(h.orchestrator.get_session_history("s1", 10_000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_returns_cancelled() {
        let client = ScriptedLlmClient::new().script("gpt-4o-mini", ScriptedReply::Hang);
        let h = harness(client);
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            });
        }

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            h.orchestrator.handle_turn("s1", "u1", "hello", &cancel),
        )
        .await
        .expect("cancelled turn should return promptly")
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(h.client.calls()[0].cancel.is_cancelled());
        assert!(h.orchestrator.get_session_history("s1", 10_000).await.unwrap().is_empty());
    }

    struct FailingService;

    #[async_trait]
    impl ConfigService for FailingService {
        async fn get_user_config(&self, _user_id: &str) -> Result<UserConfig, ConfigServiceError> {
            Err(ConfigServiceError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_config_service_outage_degrades_to_defaults() {
        let client = Arc::new(ScriptedLlmClient::new());
        let cache = Arc::new(ConfigCache::new(Arc::new(FailingService), NodeDefaults::builtin("mock")));
        let orchestrator =
            OrchestratorBuilder::new(cache, Arc::new(ProviderRegistry::single(client.clone()))).build();

        let outcome = orchestrator
            .handle_turn("s1", "u1", "update the Acme deal", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.node, NodeName::CrmWorker);
        assert_eq!(outcome.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_parallel_sessions_keep_turn_pairs_together() {
        let h = Arc::new(harness(ScriptedLlmClient::new()));
        let mut handles = Vec::new();
        for i in 0..16 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                let session = format!("s{}", i % 4);
                let user = format!("u{}", i % 4);
                h.orchestrator
                    .handle_turn(&session, &user, &format!("hello {i}"), &CancellationToken::new())
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for s in 0..4 {
            let history = h
                .orchestrator
                .get_session_history(&format!("s{s}"), 100_000)
                .await
                .unwrap();
            assert_eq!(history.len(), 8);
            for pair in history.chunks(2) {
                assert_eq!(pair[0].role, Role::User);
                assert_eq!(pair[1].role, Role::Assistant);
                assert!(pair[1].content.ends_with(&pair[0].content));
            }
        }
    }
}
