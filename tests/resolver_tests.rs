//! Resolver contract tests: end-to-end resolution against in-memory
//! providers, concurrency behavior, policy gating, and failure aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use secretops::config::{
    Config, Environment, EnvPolicy, ProviderConfig, SecretReference, Variable,
};
use secretops::provider::{MemoryProvider, ProviderRegistry};
use secretops::resolver::Resolver;

fn provider_config(ptype: &str, timeout_ms: u64) -> ProviderConfig {
    serde_yaml::from_str(&format!("type: {ptype}\ntimeout_ms: {timeout_ms}")).unwrap()
}

fn bare_env(vars: &[(&str, &str)]) -> Environment {
    vars.iter()
        .map(|(k, v)| ((*k).to_string(), Variable::Bare((*v).to_string())))
        .collect()
}

fn from_ref(provider: &str, key: &str, transform: Option<&str>, optional: bool) -> Variable {
    Variable::Detailed {
        literal: None,
        from: Some(SecretReference::Store {
            provider: provider.into(),
            key: key.into(),
            version: None,
        }),
        transform: transform.map(str::to_string),
        optional,
    }
}

fn make_resolver(config: Config, providers: Vec<Arc<MemoryProvider>>) -> Resolver {
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(provider);
    }
    Resolver::new(Arc::new(config), registry)
}

// Scenario 1: a literal resolves with source "literal".
#[tokio::test]
async fn literal_environment_resolves() {
    let mut config = Config::default();
    config
        .envs
        .insert("dev".into(), bare_env(&[("DB_PASSWORD", "localhost")]));

    let resolved = make_resolver(config, vec![]).resolve("dev").await.unwrap();

    let var = &resolved.variables["DB_PASSWORD"];
    assert_eq!(var.value, "localhost");
    assert_eq!(var.source, "literal");
    assert_eq!(resolved.values()["DB_PASSWORD"], "localhost");
}

// Scenario 2: two slow providers resolve concurrently, not serially.
#[tokio::test]
async fn resolution_fans_out_across_providers() {
    let mut config = Config::default();
    config
        .providers
        .insert("p1".into(), provider_config("memory", 5_000));
    config
        .providers
        .insert("p2".into(), provider_config("memory", 5_000));
    config.envs.insert(
        "dev".into(),
        bare_env(&[("A", "store://p1/k"), ("B", "store://p2/k")]),
    );

    let delay = Duration::from_millis(50);
    let p1 = Arc::new(MemoryProvider::new("p1").with_value("k", "a").with_delay(delay));
    let p2 = Arc::new(MemoryProvider::new("p2").with_value("k", "b").with_delay(delay));

    let started = Instant::now();
    let resolved = make_resolver(config, vec![p1, p2])
        .resolve("dev")
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    let values = resolved.values();
    assert_eq!(values["A"], "a");
    assert_eq!(values["B"], "b");
}

// Scenario 3: an unregistered provider is a config error and nothing runs.
#[tokio::test]
async fn unknown_provider_is_config_error_without_calls() {
    let mut config = Config::default();
    config
        .providers
        .insert("real".into(), provider_config("memory", 1_000));
    config.envs.insert(
        "dev".into(),
        bare_env(&[("A", "store://x/key"), ("B", "store://real/key")]),
    );

    // The registered provider would fail loudly if contacted.
    let real = Arc::new(MemoryProvider::new("real").with_value("key", "v"));
    real.fail_resolve_with("must not be called");

    let err = make_resolver(config, vec![real])
        .resolve("dev")
        .await
        .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("provider not found"));
    assert!(!err.to_string().contains("must not be called"));
}

// Scenario 4: base64 transform on a provider-sourced value.
#[tokio::test]
async fn base64_transform_applies_after_fetch() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    let mut env = Environment::new();
    env.insert(
        "SECRET".into(),
        from_ref("mem", "blob", Some("base64_decode"), false),
    );
    config.envs.insert("dev".into(), env);

    let mem = Arc::new(
        MemoryProvider::new("mem").with_value("blob", "c2VjcmV0LXBhc3N3b3JkLTEyMw=="),
    );
    let resolved = make_resolver(config, vec![mem]).resolve("dev").await.unwrap();

    let var = &resolved.variables["SECRET"];
    assert_eq!(var.value, "secret-password-123");
    assert!(var.transformed);
}

// Scenario 5: json_extract walks into nested credentials.
#[tokio::test]
async fn json_extract_transform_pulls_nested_field() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    let mut env = Environment::new();
    env.insert(
        "PASSWORD".into(),
        from_ref(
            "mem",
            "doc",
            Some("json_extract:.credentials.password"),
            false,
        ),
    );
    config.envs.insert("dev".into(), env);

    let mem = Arc::new(
        MemoryProvider::new("mem").with_value("doc", r#"{"credentials":{"password":"p"}}"#),
    );
    let resolved = make_resolver(config, vec![mem]).resolve("dev").await.unwrap();
    assert_eq!(resolved.variables["PASSWORD"].value, "p");
}

// Scenario 6: two required failures aggregate; the optional one stays out
// of the aggregate.
#[tokio::test]
async fn aggregation_counts_only_required_failures() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    let mut env = Environment::new();
    env.insert("FIRST".into(), from_ref("mem", "missing-1", None, false));
    env.insert("SECOND".into(), from_ref("mem", "missing-2", None, false));
    env.insert("MAYBE".into(), from_ref("mem", "missing-3", None, true));
    config.envs.insert("dev".into(), env);

    let mem = Arc::new(MemoryProvider::new("mem"));
    let err = make_resolver(config, vec![mem]).resolve("dev").await.unwrap_err();

    let rendered = err.render();
    assert!(rendered.contains("Failed to resolve 2 variables"));
    assert!(rendered.contains("FIRST"));
    assert!(rendered.contains("SECOND"));
    assert!(!rendered.contains("MAYBE"));
}

#[tokio::test]
async fn optional_failures_stay_attached_to_records() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    let mut env = bare_env(&[("GOOD", "store://mem/present")]);
    env.insert("MAYBE".into(), from_ref("mem", "absent", None, true));
    config.envs.insert("dev".into(), env);

    let mem = Arc::new(MemoryProvider::new("mem").with_value("present", "yes"));
    let resolved = make_resolver(config, vec![mem]).resolve("dev").await.unwrap();

    // The record keeps its error; the flat map drops it.
    assert!(resolved.variables["MAYBE"].error.is_some());
    assert_eq!(resolved.values().len(), 1);
    assert_eq!(resolved.values()["GOOD"], "yes");
}

#[tokio::test]
async fn service_references_are_rejected() {
    let mut config = Config::default();
    config
        .envs
        .insert("dev".into(), bare_env(&[("A", "svc://billing-db")]));

    let err = make_resolver(config, vec![]).resolve("dev").await.unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("rotation target"));
}

#[tokio::test]
async fn policy_rejection_happens_before_any_provider_call() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    config.policies.denied_provider_types = vec!["memory".into()];
    config.envs.insert(
        "dev".into(),
        bare_env(&[("A", "store://mem/k"), ("B", "literal-ok")]),
    );

    let mem = Arc::new(MemoryProvider::new("mem").with_value("k", "v"));
    mem.fail_resolve_with("must not be called");

    let err = make_resolver(config, vec![mem]).resolve("dev").await.unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("denied"));
}

#[tokio::test]
async fn per_environment_secret_budget_is_enforced() {
    let mut config = Config::default();
    config.policies.environments.insert(
        "dev".into(),
        EnvPolicy {
            max_secrets: 1,
            ..EnvPolicy::default()
        },
    );
    config
        .envs
        .insert("dev".into(), bare_env(&[("A", "x"), ("B", "y")]));

    let err = make_resolver(config, vec![]).resolve("dev").await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn plan_never_contacts_providers() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 1_000));
    config
        .envs
        .insert("dev".into(), bare_env(&[("A", "store://mem/k")]));

    let mem = Arc::new(MemoryProvider::new("mem").with_value("k", "v"));
    mem.fail_resolve_with("must not be called");
    mem.fail_validate_with("must not be called");

    let resolver = make_resolver(config, vec![mem]);
    let report = resolver.plan("dev").unwrap();
    assert_eq!(report.variables.len(), 1);
    assert!(report.errors.is_empty());
}

// Cancellation: dropping the resolve future aborts in-flight work and the
// caller regains control within its own grace window.
#[tokio::test]
async fn cancelled_resolve_returns_within_grace_window() {
    let mut config = Config::default();
    config
        .providers
        .insert("slow".into(), provider_config("memory", 60_000));
    config
        .envs
        .insert("dev".into(), bare_env(&[("A", "store://slow/k")]));

    let slow = Arc::new(
        MemoryProvider::new("slow")
            .with_value("k", "v")
            .with_delay(Duration::from_secs(30)),
    );
    let resolver = make_resolver(config, vec![slow]);

    let started = Instant::now();
    let outcome =
        tokio::time::timeout(Duration::from_millis(100), resolver.resolve("dev")).await;
    assert!(outcome.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
}

// A large environment respects the in-flight bound instead of stampeding.
#[tokio::test]
async fn large_environments_resolve_under_bounded_parallelism() {
    let mut config = Config::default();
    config
        .providers
        .insert("mem".into(), provider_config("memory", 5_000));

    let mut env = BTreeMap::new();
    let mem = MemoryProvider::new("mem").with_delay(Duration::from_millis(1));
    for i in 0..200 {
        let key = format!("key-{i}");
        mem.insert(&key, &format!("value-{i}"));
        env.insert(format!("VAR_{i}"), Variable::Bare(format!("store://mem/{key}")));
    }
    config.envs.insert("dev".into(), env);

    let resolved = make_resolver(config, vec![Arc::new(mem)])
        .resolve("dev")
        .await
        .unwrap();
    assert_eq!(resolved.values().len(), 200);
    assert_eq!(resolved.values()["VAR_137"], "value-137");
}
