use graphgate::config::TenancyConfig;
use graphgate::tenant::{ExtractedName, TenantResolver, SEPARATOR};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn all_modes() -> Vec<TenantResolver> {
    vec![
        TenantResolver::new(false, false),
        TenantResolver::new(true, false),
        TenantResolver::new(false, true),
        TenantResolver::new(true, true),
    ]
}

#[test]
fn test_no_tenant_is_identity_in_every_mode() {
    for resolver in all_modes() {
        for name in ["orders", "a_b", "", "x__y"] {
            assert_eq!(resolver.resolve(name, None), name);
        }
    }
}

#[test]
fn test_inactive_resolver_ignores_tenant() {
    for resolver in &all_modes()[..3] {
        assert_eq!(resolver.resolve("orders", Some("tenantA")), "orders");
        assert_eq!(resolver.extract("tenantA_orders"), None);
    }
}

#[test]
fn test_resolve_then_extract_round_trips() {
    let resolver = TenantResolver::new(true, true);
    for (tenant, name) in [("tenantA", "orders"), ("t1", "graph_with_underscores"), ("", "x")] {
        let physical = resolver.resolve(name, Some(tenant));
        assert_eq!(
            resolver.extract(&physical),
            Some(ExtractedName {
                tenant_id: tenant.to_string(),
                original_graph_name: name.to_string(),
            })
        );
    }
}

#[test]
fn test_empty_tenant_still_prefixes() {
    let resolver = TenantResolver::new(true, true);
    assert_eq!(resolver.resolve("orders", Some("")), format!("{SEPARATOR}orders"));
}

#[test]
fn test_filter_scenario() {
    let resolver = TenantResolver::new(true, true);
    let all = names(&["orders", "tenantA_orders", "tenantB_orders"]);
    assert_eq!(resolver.filter_for_tenant(&all, Some("tenantA")), vec!["orders"]);
    assert_eq!(resolver.filter_for_tenant(&all, None), vec!["orders"]);
}

#[test]
fn test_filter_inactive_preserves_order() {
    let resolver = TenantResolver::new(true, false);
    let all = names(&["b", "tenantA_a", "c"]);
    assert_eq!(resolver.filter_for_tenant(&all, Some("tenantA")), all);
}

#[test]
fn test_filtered_names_resolve_back_into_listing() {
    let resolver = TenantResolver::new(true, true);
    let all = names(&["shared", "acme_orders", "acme_users", "globex_orders"]);
    for visible in resolver.filter_for_tenant(&all, Some("acme")) {
        assert!(all.contains(&resolver.resolve(&visible, Some("acme"))));
        assert!(resolver.validate_access(&visible, Some("acme"), &all));
    }
}

#[test]
fn test_validate_access_across_tenants() {
    let resolver = TenantResolver::new(true, true);
    let all = names(&["acme_orders", "globex_orders"]);
    assert!(resolver.validate_access("orders", Some("acme"), &all));
    assert!(!resolver.validate_access("globex_orders", Some("acme"), &all));
    assert!(!resolver.validate_access("orders", None, &all));
}

#[test]
fn test_from_config_needs_both_flags() {
    let mut config = TenancyConfig::default();
    assert!(!TenantResolver::from_config(&config).is_active());
    config.multi_tenancy = true;
    assert!(TenantResolver::from_config(&config).is_active());
    config.prefix_graph_names = false;
    assert!(!TenantResolver::from_config(&config).is_active());
}
