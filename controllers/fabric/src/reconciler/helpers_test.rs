//! Unit tests for the pure reconciliation helpers.

mod tests {
    use super::super::*;
    use crate::reconciler::configuration::{
        definition_coordinates, initialize_conditions, mark_waiting_for_nodes,
    };
    use crate::reconciler::healthcheck::check_needed;
    use chrono::{Duration as ChronoDuration, Utc};
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};

    fn node_with_addresses(addresses: Vec<NodeAddress>) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(addresses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn internal_address_is_selected_among_others() {
        let node = node_with_addresses(vec![
            NodeAddress {
                type_: "Hostname".to_string(),
                address: "worker-1".to_string(),
            },
            NodeAddress {
                type_: "InternalIP".to_string(),
                address: "10.0.0.4".to_string(),
            },
        ]);
        assert_eq!(node_internal_address(&node), Some("10.0.0.4".to_string()));
    }

    #[test]
    fn node_without_internal_address_yields_none() {
        let node = node_with_addresses(vec![NodeAddress {
            type_: "Hostname".to_string(),
            address: "worker-1".to_string(),
        }]);
        assert_eq!(node_internal_address(&node), None);

        let bare = Node::default();
        assert_eq!(node_internal_address(&bare), None);
    }

    #[test]
    fn address_comparison_ignores_order() {
        let a = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let b = vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()];
        assert!(addresses_equal(&a, &b));

        let c = vec!["10.0.0.1".to_string()];
        assert!(!addresses_equal(&a, &c));
        assert!(addresses_equal(&[], &[]));
    }

    #[test]
    fn remove_address_drops_only_the_matching_entry() {
        let addresses = vec![
            "10.0.0.1".to_string(),
            "10.0.0.2".to_string(),
            "10.0.0.3".to_string(),
        ];
        assert_eq!(
            remove_address(&addresses, "10.0.0.2"),
            vec!["10.0.0.1".to_string(), "10.0.0.3".to_string()]
        );
        assert_eq!(remove_address(&addresses, "10.0.0.9"), addresses);
        assert!(remove_address(&[], "10.0.0.1").is_empty());
    }

    #[test]
    fn status_patch_carries_resource_version_precondition() {
        let status = fabric_api::ConfigurationStatus::default();
        let patch = status_patch_body(Some("42"), &status).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert!(patch.get("status").is_some());
    }

    #[test]
    fn emptied_address_list_survives_into_the_status_patch() {
        let status = fabric_api::ConfigurationStatus {
            matching_node_addresses: remove_address(&["10.0.0.5".to_string()], "10.0.0.5"),
            ..Default::default()
        };
        let patch = status_patch_body(Some("42"), &status).unwrap();
        // the key must be present, a merge patch drops omitted fields on
        // the floor and the server would keep the stale address
        assert_eq!(
            patch["status"]["matchingNodeAddresses"],
            serde_json::json!([])
        );
    }

    #[test]
    fn finalizer_patch_replaces_the_list() {
        let patch = finalizers_patch_body(Some("7"), &["fabric.io/node".to_string()]);
        assert_eq!(patch["metadata"]["resourceVersion"], "7");
        assert_eq!(patch["metadata"]["finalizers"][0], "fabric.io/node");

        let empty = finalizers_patch_body(None, &[]);
        assert_eq!(
            empty["metadata"]["finalizers"],
            serde_json::Value::Array(vec![])
        );
    }

    #[test]
    fn owner_reference_requires_a_uid() {
        let mut config = fabric_api::Configuration::new(
            "fabric",
            fabric_api::ConfigurationSpec::default(),
        );
        assert!(controller_owner_reference(&config).is_err());

        config.metadata.uid = Some("abc-123".to_string());
        let reference = controller_owner_reference(&config).unwrap();
        assert_eq!(reference["apiVersion"], "fabric.io/v1");
        assert_eq!(reference["kind"], "Configuration");
        assert_eq!(reference["uid"], "abc-123");
        assert_eq!(reference["controller"], true);
    }

    #[test]
    fn condition_initialization_is_idempotent() {
        let mut config = fabric_api::Configuration::new(
            "fabric",
            fabric_api::ConfigurationSpec::default(),
        );
        initialize_conditions(&mut config);
        let first = config.status.clone().unwrap().conditions;
        assert_eq!(first.len(), 5);

        // a second pass must not touch existing conditions
        initialize_conditions(&mut config);
        assert_eq!(config.status.clone().unwrap().conditions, first);

        // nor may it reset one that a probe already set
        config.set_condition(
            fabric_api::NB_DB_HEALTH_CONDITION,
            fabric_api::ConditionStatus::True,
            "healthy",
            fabric_api::REASON_DB_HEALTH,
        );
        initialize_conditions(&mut config);
        assert!(config.condition_true(fabric_api::NB_DB_HEALTH_CONDITION));
    }

    #[test]
    fn zero_match_marking_is_idempotent() {
        let mut config = fabric_api::Configuration::new(
            "fabric",
            fabric_api::ConfigurationSpec::default(),
        );
        config.status = Some(fabric_api::ConfigurationStatus {
            matching_node_addresses: vec!["10.0.0.4".to_string()],
            ..Default::default()
        });

        // first pass transitions the condition, clears addresses
        assert!(mark_waiting_for_nodes(&mut config));
        assert!(config.condition_true(fabric_api::WAITING_FOR_MATCHING_NODES_CONDITION));
        assert!(config.matching_node_addresses().is_empty());

        // a repeat pass must not touch the status, notably not the
        // condition's transition time, or every reconcile would patch
        let snapshot = config.status.clone();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!mark_waiting_for_nodes(&mut config));
        assert_eq!(config.status, snapshot);
    }

    #[test]
    fn definition_coordinates_cover_all_declared_versions() {
        let body = serde_json::json!({
            "spec": {
                "group": "fabric.io",
                "names": { "plural": "switchports", "kind": "SwitchPort" },
                "versions": [ { "name": "v1alpha1" }, { "name": "v1" } ],
            }
        });
        let coordinates = definition_coordinates(&body).unwrap();
        assert_eq!(coordinates.group, "fabric.io");
        assert_eq!(coordinates.plural, "switchports");
        assert_eq!(coordinates.kind, "SwitchPort");
        assert_eq!(coordinates.versions, ["v1alpha1", "v1"]);

        let truncated = serde_json::json!({ "spec": { "group": "fabric.io" } });
        assert!(definition_coordinates(&truncated).is_err());
    }

    #[test]
    fn healthcheck_gate_honors_the_interval() {
        let interval = Duration::from_secs(300);
        let now = Utc::now();

        // no condition yet, probe immediately
        assert!(check_needed(None, interval, now));

        let mut config = fabric_api::Configuration::new(
            "fabric",
            fabric_api::ConfigurationSpec::default(),
        );
        config.set_condition(
            fabric_api::NB_LEADER_FOUND_CONDITION,
            fabric_api::ConditionStatus::True,
            "found",
            fabric_api::REASON_LEADER_FOUND,
        );

        let fresh = config
            .lookup_condition(fabric_api::NB_LEADER_FOUND_CONDITION)
            .unwrap();
        assert!(!check_needed(Some(fresh), interval, now));

        let mut stale = fresh.clone();
        stale.last_transition_time = now - ChronoDuration::seconds(301);
        assert!(check_needed(Some(&stale), interval, now));
    }
}
