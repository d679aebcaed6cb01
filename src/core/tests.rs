//! Lifecycle tests across controller, session and cleanup coordinator

#[cfg(test)]
mod lifecycle {
    use crate::core::cleanup::{CleanupCoordinator, Release};
    use crate::core::context::ExposureContext;
    use crate::core::controller::{
        ExposureController, ExposureState, ReportOptions, shutdown_requested,
    };
    use crate::core::error::{DiscoveryError, ExposeError, FirewallError, MappingError};
    use crate::core::firewall::{FirewallRuleProvisioner, RuleOutcome};
    use crate::core::gateway::{GatewayOptions, GatewayProtocolClient};
    use crate::core::test_helpers::{
        FirewallCall, Journal, MockFirewall, MockGateway, entries, journal,
    };
    use crate::core::types::{ExposeRequest, Protocol};
    use crate::validators::parse_public_args;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    type Controller = ExposureController<MockFirewall, MockGateway>;

    type Coordinator = CleanupCoordinator<MockFirewall, MockGateway>;

    fn build(firewall: MockFirewall, gateway: MockGateway) -> (Controller, Coordinator) {
        let ctx = Arc::new(ExposureContext::new(
            FirewallRuleProvisioner::new(firewall),
            GatewayProtocolClient::new(gateway, GatewayOptions::default()),
        ));
        let controller = ExposureController::new(ctx, ReportOptions::default());
        let coordinator = controller.coordinator();
        (controller, coordinator)
    }

    fn with_journal() -> (Controller, Coordinator, Journal) {
        let log = journal();
        let (controller, coordinator) = build(
            MockFirewall::with_journal(Arc::clone(&log)),
            MockGateway::with_journal(Arc::clone(&log)),
        );
        (controller, coordinator, log)
    }

    fn request(port: u16, protocol: Protocol) -> ExposeRequest {
        ExposeRequest { port, protocol }
    }

    #[tokio::test]
    async fn test_full_lifecycle_releases_mapping_before_rule() {
        let (controller, coordinator, log) = with_journal();

        controller.expose(request(8080, Protocol::Tcp)).await.unwrap();
        let report = coordinator.teardown().await;

        assert_eq!(
            entries(&log),
            vec![
                "firewall.add MiniShell_8080_TCP",
                "gateway.discover",
                "gateway.add 8080/TCP",
                "gateway.remove 8080/TCP",
                "firewall.remove MiniShell_8080_TCP",
            ]
        );
        assert_eq!(
            report.rule,
            Release::Released {
                target: "MiniShell_8080_TCP".into()
            }
        );
        assert!(!controller.session().is_active());
    }

    #[tokio::test]
    async fn test_repeated_teardown_releases_once() {
        let (controller, coordinator, log) = with_journal();
        controller.expose(request(27015, Protocol::Udp)).await.unwrap();

        let first = coordinator.teardown().await;
        assert!(!first.is_noop());
        for _ in 0..5 {
            assert!(coordinator.teardown().await.is_noop());
        }

        let removals: Vec<_> = entries(&log)
            .into_iter()
            .filter(|e| e.contains("remove"))
            .collect();
        assert_eq!(
            removals,
            vec!["gateway.remove 27015/UDP", "firewall.remove MiniShell_27015_UDP"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_teardowns_release_once() {
        let (controller, coordinator, _log) = with_journal();
        controller.expose(request(8080, Protocol::Tcp)).await.unwrap();

        let reports = tokio::join!(
            coordinator.teardown(),
            coordinator.teardown(),
            controller.shutdown()
        );

        let released_rules = [reports.0, reports.1, reports.2]
            .iter()
            .filter(|r| matches!(r.rule, Release::Released { .. }))
            .count();
        assert_eq!(released_rules, 1);
    }

    #[tokio::test]
    async fn test_soft_success_equivalence() {
        let fresh_fw = MockFirewall::default();
        let existing_fw = MockFirewall::default();
        existing_fw.fail_add_with(FirewallError::AlreadyExists);
        let denied_fw = MockFirewall::default();
        denied_fw.fail_add_with(FirewallError::Denied("Access is denied".into()));

        let mut outcomes = Vec::new();
        let mut removals = Vec::new();
        for firewall in [fresh_fw, existing_fw, denied_fw] {
            let (controller, coordinator) = build(firewall, MockGateway::default());
            let exposure = controller.expose(request(8080, Protocol::Tcp)).await.unwrap();
            assert_eq!(
                controller.session().rule_name().as_deref(),
                Some("MiniShell_8080_TCP")
            );
            outcomes.push(exposure.rule_outcome);

            coordinator.teardown().await;
            removals.push(controller.context().firewall.backend().removals());
        }

        assert_eq!(outcomes[0], RuleOutcome::Added);
        assert_eq!(outcomes[1], RuleOutcome::AlreadyPresent);
        assert!(matches!(outcomes[2], RuleOutcome::Unverified { .. }));
        for removal in &removals {
            assert_eq!(removal, &vec!["MiniShell_8080_TCP".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_validation_is_side_effect_free() {
        let (controller, coordinator, log) = with_journal();

        assert!(ExposeRequest::parse("TCP", "notanumber").is_err());
        assert!(ExposeRequest::parse("ICMP", "80").is_err());
        assert!(parse_public_args(&["TCP", "--port:notanumber"]).is_err());
        assert!(parse_public_args(&["ICMP", "--port:80"]).is_err());

        assert!(!controller.session().is_active());
        assert_eq!(controller.state(), ExposureState::Idle);
        assert!(coordinator.teardown().await.is_noop());
        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_hard_firewall_failure_holds_nothing() {
        let firewall = MockFirewall::default();
        firewall.fail_add_with(FirewallError::other("table missing"));
        let (controller, coordinator) = build(firewall, MockGateway::default());

        let err = controller
            .expose(request(8080, Protocol::Tcp))
            .await
            .unwrap_err();

        assert!(matches!(err, ExposeError::Firewall(_)));
        assert!(!err.rule_still_held());
        assert!(!controller.session().is_active());
        assert_eq!(controller.state(), ExposureState::Idle);
        assert!(coordinator.teardown().await.is_noop());
    }

    #[tokio::test]
    async fn test_discovery_failure_leaves_rule_for_teardown() {
        let gateway = MockGateway::default();
        gateway.fail_discovery_with(DiscoveryError::NoGateway { timeout_ms: 2000 });
        let (controller, coordinator) = build(MockFirewall::default(), gateway);

        let err = controller
            .expose(request(8080, Protocol::Tcp))
            .await
            .unwrap_err();

        assert!(matches!(err, ExposeError::Discovery(DiscoveryError::NoGateway { .. })));
        assert_eq!(controller.state(), ExposureState::FirewallActive);
        assert_eq!(
            controller.session().rule_name().as_deref(),
            Some("MiniShell_8080_TCP")
        );
        assert!(controller.session().public_endpoint().is_none());

        let report = coordinator.teardown().await;
        assert_eq!(report.mapping, Release::NotHeld);
        assert!(matches!(report.rule, Release::Released { .. }));
    }

    #[tokio::test]
    async fn test_rejected_mapping_is_never_deleted() {
        let log = journal();
        let gateway = MockGateway::with_journal(Arc::clone(&log));
        gateway.fail_add_with(MappingError::Rejected("ConflictInMappingEntry".into()));
        let firewall = MockFirewall::with_journal(Arc::clone(&log));
        let (controller, coordinator) = build(firewall, gateway);

        assert!(controller.expose(request(80, Protocol::Tcp)).await.is_err());
        coordinator.teardown().await;

        assert!(!entries(&log).iter().any(|e| e.starts_with("gateway.remove")));
        assert!(entries(&log).contains(&"firewall.remove MiniShell_80_TCP".to_string()));
    }

    #[tokio::test]
    async fn test_second_expose_replaces_the_slot() {
        let gateway = MockGateway::default();
        gateway.fail_discovery_with(DiscoveryError::Search("socket closed".into()));
        let (controller, coordinator, log) = {
            let log = journal();
            let (c, k) = build(MockFirewall::with_journal(Arc::clone(&log)), gateway);
            (c, k, log)
        };

        assert!(controller.expose(request(8080, Protocol::Tcp)).await.is_err());
        assert!(controller.expose(request(9090, Protocol::Udp)).await.is_err());

        // The first rule was released before the second was added
        assert_eq!(
            entries(&log),
            vec![
                "firewall.add MiniShell_8080_TCP",
                "firewall.remove MiniShell_8080_TCP",
                "firewall.add MiniShell_9090_UDP",
            ]
        );
        assert_eq!(
            controller.session().rule_name().as_deref(),
            Some("MiniShell_9090_UDP")
        );
        coordinator.teardown().await;
        assert!(!controller.session().is_active());
    }

    #[tokio::test]
    async fn test_second_successful_expose_keeps_one_mapping() {
        let (controller, coordinator, log) = with_journal();

        controller.expose(request(8080, Protocol::Tcp)).await.unwrap();
        controller.expose(request(8081, Protocol::Tcp)).await.unwrap();

        assert_eq!(
            controller.session().public_endpoint().map(|e| e.port()),
            Some(8081)
        );
        coordinator.teardown().await;

        let removals: Vec<_> = entries(&log)
            .into_iter()
            .filter(|e| e.starts_with("gateway.remove"))
            .collect();
        assert_eq!(removals, vec!["gateway.remove 8080/TCP", "gateway.remove 8081/TCP"]);
    }

    #[tokio::test]
    async fn test_cancellation_during_mapping_removes_only_rule() {
        let log = journal();
        let (controller, coordinator) = build(
            MockFirewall::with_journal(Arc::clone(&log)),
            MockGateway::hanging_add(Arc::clone(&log)),
        );
        let (tx, mut rx) = watch::channel(false);

        let expose = controller.expose(request(8080, Protocol::Tcp));
        let cancel = async {
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
        };

        let cancelled = tokio::select! {
            _ = expose => false,
            () = async { cancel.await; shutdown_requested(&mut rx).await } => true,
        };
        assert!(cancelled);

        let report = coordinator.teardown().await;
        assert_eq!(report.mapping, Release::NotHeld);
        assert!(matches!(report.rule, Release::Released { .. }));
        assert!(entries(&log).contains(&"gateway.add 8080/TCP".to_string()));
        assert!(!entries(&log).iter().any(|e| e.starts_with("gateway.remove")));
    }

    #[tokio::test]
    async fn test_removal_targets_creation_identifiers() {
        let (controller, coordinator) = build(MockFirewall::default(), MockGateway::default());
        controller.expose(request(8080, Protocol::Tcp)).await.unwrap();
        coordinator.teardown().await;

        let ctx = controller.context();
        assert_eq!(
            ctx.firewall.backend().calls(),
            vec![
                FirewallCall::Add("MiniShell_8080_TCP".into()),
                FirewallCall::Remove("MiniShell_8080_TCP".into()),
            ]
        );
        assert_eq!(ctx.gateway.backend().removals(), vec![(8080, Protocol::Tcp)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_expose_still_removes_previous_rule() {
        let (controller, coordinator) = build(
            MockFirewall::slow_remove(Duration::from_secs(5)),
            MockGateway::default(),
        );
        controller
            .context()
            .gateway
            .backend()
            .fail_discovery_with(DiscoveryError::NoGateway { timeout_ms: 100 });

        // Leaves the rule held
        let err = controller.expose(request(8080, Protocol::Tcp)).await.unwrap_err();
        assert!(err.rule_still_held());

        // Dropped while the leftover rule is being removed
        let second = tokio::time::timeout(
            Duration::from_secs(1),
            controller.expose(request(9090, Protocol::Tcp)),
        )
        .await;
        assert!(second.is_err());

        // Waits for the removal already in flight
        assert!(coordinator.teardown().await.is_noop());
        assert_eq!(
            controller.context().firewall.backend().removals(),
            vec!["MiniShell_8080_TCP".to_string()]
        );
        assert!(!controller.session().is_active());
    }
}
